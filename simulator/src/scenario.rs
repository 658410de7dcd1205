//! Simulation scenarios.

/// A scripted simulation run.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone)]
pub enum ScenarioStep {
    /// Resolve every configured pair once.
    RunRound,
    /// Resolve every configured pair for several rounds.
    RunRounds { rounds: usize },
    /// Pause between steps.
    Wait { millis: u64 },
    /// Take an exchange offline.
    TakeOffline { exchange: String },
    /// Bring an exchange back online.
    BringOnline { exchange: String },
    /// Sleep past the validity window so every cache goes cold.
    ExpireCaches,
}

impl Scenario {
    /// Load a built-in scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "steady" => Ok(Self::steady()),
            "flaky-exchange" => Ok(Self::flaky_exchange()),
            "cold-cache" => Ok(Self::cold_cache()),
            "fallback-drill" => Ok(Self::fallback_drill()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Steady warm-cache resolution.
    fn steady() -> Self {
        Self {
            name: "steady".to_string(),
            description: "Warm-cache resolution at a steady cadence".to_string(),
            steps: vec![ScenarioStep::RunRounds { rounds: 10 }],
        }
    }

    /// The primary exchange flaps offline while rates keep flowing.
    ///
    /// While the outage is shorter than the validity window the stale
    /// snapshot keeps serving; once the caches expire the fallback rules
    /// take over until the exchange recovers.
    fn flaky_exchange() -> Self {
        Self {
            name: "flaky-exchange".to_string(),
            description: "Primary exchange flaps offline mid-run".to_string(),
            steps: vec![
                ScenarioStep::RunRounds { rounds: 3 },
                ScenarioStep::TakeOffline {
                    exchange: "kraken".to_string(),
                },
                // Still served from the stale snapshot.
                ScenarioStep::RunRound,
                ScenarioStep::ExpireCaches,
                ScenarioStep::RunRounds { rounds: 2 },
                ScenarioStep::BringOnline {
                    exchange: "kraken".to_string(),
                },
                ScenarioStep::RunRounds { rounds: 3 },
            ],
        }
    }

    /// Every round starts against cold caches.
    fn cold_cache() -> Self {
        Self {
            name: "cold-cache".to_string(),
            description: "First fetch pays full feed latency, the rest are warm".to_string(),
            steps: vec![
                ScenarioStep::ExpireCaches,
                ScenarioStep::RunRound,
                ScenarioStep::RunRounds { rounds: 3 },
                ScenarioStep::ExpireCaches,
                ScenarioStep::RunRound,
            ],
        }
    }

    /// Force the fallback rules to carry the whole run.
    fn fallback_drill() -> Self {
        Self {
            name: "fallback-drill".to_string(),
            description: "Primary exchange down from the start, fallback resolves".to_string(),
            steps: vec![
                ScenarioStep::TakeOffline {
                    exchange: "kraken".to_string(),
                },
                ScenarioStep::RunRounds { rounds: 5 },
                ScenarioStep::BringOnline {
                    exchange: "kraken".to_string(),
                },
                ScenarioStep::Wait { millis: 500 },
                ScenarioStep::RunRounds { rounds: 2 },
            ],
        }
    }
}
