//! Common types shared by the pipeline stages.

use std::fmt;
use std::time::Duration;

/// Pipeline stage, used as span name and for timing attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Compile,
    Setup,
    Prove,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Setup => write!(f, "setup"),
            Stage::Prove => write!(f, "prove"),
            Stage::Verify => write!(f, "verify"),
        }
    }
}

/// Timing breakdown for a session.
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    pub compile: Duration,
    pub setup: Duration,
    pub prove: Duration,
    pub verify: Duration,
    pub total: Duration,
}

impl StageTimings {
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        match stage {
            Stage::Compile => self.compile = elapsed,
            Stage::Setup => self.setup = elapsed,
            Stage::Prove => self.prove = elapsed,
            Stage::Verify => self.verify = elapsed,
        }
        self.total += elapsed;
    }
}

/// Shape of the compiled system after compression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemStats {
    pub nb_constraints: u64,
    pub nb_explicit: usize,
    pub nb_templates: usize,
    pub nb_wires: u64,
    pub nb_public: u32,
    pub memory_bytes: usize,
}

/// Outcome of a full session run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: String,
    pub stats: SystemStats,
    pub proof_bytes: u64,
    pub verified: bool,
    pub timings: StageTimings,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_millis();
        writeln!(f, "session:      {}", self.session)?;
        writeln!(
            f,
            "constraints:  {} ({} explicit, {} templates)",
            self.stats.nb_constraints, self.stats.nb_explicit, self.stats.nb_templates
        )?;
        writeln!(f, "wires:        {} ({} public)", self.stats.nb_wires, self.stats.nb_public)?;
        writeln!(f, "system bytes: {}", self.stats.memory_bytes)?;
        writeln!(f, "proof bytes:  {}", self.proof_bytes)?;
        writeln!(f, "verified:     {}", self.verified)?;
        write!(
            f,
            "timings (ms): compile={} setup={} prove={} verify={} total={}",
            ms(self.timings.compile),
            ms(self.timings.setup),
            ms(self.timings.prove),
            ms(self.timings.verify),
            ms(self.timings.total)
        )
    }
}
