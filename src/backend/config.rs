use crate::backend::register::Register;

/// Scratch registers a single instruction may hold at once: an element address
/// whose base, index and result are all spilled.
pub const MIN_SCRATCH: usize = 4;

/// Register pools and conventions for the RISC-V target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Registers handed to linear scan, in preference order.
    pub allocatable: Vec<Register>,
    /// Registers the code generator uses to materialise spilled and global values.
    pub scratch: Vec<Register>,
    /// Outside both pools: address materialisation during write-back, large stack
    /// offsets and the fallback when every scratch register is locked.
    pub reserved: Register,
    /// The function that terminates the process instead of returning.
    pub entry: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            allocatable: (1..=11).filter_map(Register::saved).collect(),
            scratch: (0..=5).filter_map(Register::temp).collect(),
            reserved: Register::T6,
            entry: "main".to_string(),
        }
    }
}

impl TargetConfig {
    pub fn with_register_limit(mut self, limit: usize) -> Self {
        self.allocatable.truncate(limit);
        self
    }

    pub fn with_scratch_limit(mut self, limit: usize) -> Self {
        self.scratch.truncate(limit);
        self
    }

    pub fn with_entry(mut self, entry: &str) -> Self {
        self.entry = entry.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pools_are_disjoint() {
        let config = TargetConfig::default();
        let names: Vec<_> = config.allocatable.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11"]);
        let scratch: Vec<_> = config.scratch.iter().map(|r| r.name()).collect();
        assert_eq!(scratch, ["t0", "t1", "t2", "t3", "t4", "t5"]);
        assert!(!config.scratch.contains(&config.reserved));
        assert!(!config.allocatable.contains(&config.reserved));
    }

    #[test]
    fn limits_keep_the_front_of_each_pool() {
        let config = TargetConfig::default().with_register_limit(2).with_scratch_limit(3);
        assert_eq!(config.allocatable.len(), 2);
        assert_eq!(config.allocatable[0].name(), "s1");
        assert_eq!(config.scratch.last().map(|r| r.name()), Some("t2"));
    }

    #[test]
    fn entry_can_be_renamed() {
        let config = TargetConfig::default().with_entry("start");
        assert_eq!(config.entry, "start");
        assert!(config.scratch.len() >= MIN_SCRATCH);
    }
}
