//! Simulation scenarios for the weapon pipeline.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// AIM-001: Full-width sweep, twist and depth motion
    Sweep,

    /// AIM-002: Marker lost in bursts and random frames
    Dropout,

    /// AIM-003: Manual and automatic reload cycles
    Reload,

    /// AIM-004: Heavy detector noise and irregular frame times
    Jitter,

    /// AIM-005: Real tracking thread feeding the render loop
    Threaded,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Sweep,
            ScenarioId::Dropout,
            ScenarioId::Reload,
            ScenarioId::Jitter,
            ScenarioId::Threaded,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Sweep => "sweep",
            ScenarioId::Dropout => "dropout",
            ScenarioId::Reload => "reload",
            ScenarioId::Jitter => "jitter",
            ScenarioId::Threaded => "threaded",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Sweep => "Marker swept edge to edge, barrel must follow the aim ray",
            ScenarioId::Dropout => "30% random dropouts plus 1s blackout, depth must hold",
            ScenarioId::Reload => "Gesture and auto reloads, all 7 phases and events in order",
            ScenarioId::Jitter => "Noisy detector and 5-40ms frames, no NaN and unit quaternions",
            ScenarioId::Threaded => "Tracking thread with failed opens and device loss, no torn snapshots",
        }
    }

    /// Returns true if the scenario uses real threads and wall-clock time.
    pub fn uses_wall_clock(&self) -> bool {
        matches!(self, ScenarioId::Threaded)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sweep" | "aim-001" => Ok(ScenarioId::Sweep),
            "dropout" | "aim-002" => Ok(ScenarioId::Dropout),
            "reload" | "aim-003" => Ok(ScenarioId::Reload),
            "jitter" | "aim-004" => Ok(ScenarioId::Jitter),
            "threaded" | "aim-005" => Ok(ScenarioId::Threaded),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
