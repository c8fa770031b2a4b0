//! Configuration Module - Collector Tuning Parameters
//!
//! Manages all configuration parameters for SGC, plus the JVM-style option
//! surface (`-Xmx`, `-XX:+Flag`, `-XX:Flag=value`) used to build them.
//!
//! Flags fall into three groups, the same way the VM gates them:
//! - product flags, always settable;
//! - diagnostic flags, which need `-XX:+UnlockDiagnosticVMOptions`;
//! - experimental flags, which need `-XX:+UnlockExperimentalVMOptions`.
//!
//! Every flag set from options is remembered in [`GcConfig::explicit_flags`],
//! so heuristics ergonomics only adjust values the user left at default.

use indexmap::{IndexMap, IndexSet};
use lazy_static::lazy_static;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;
pub const GB: usize = 1024 * 1024 * 1024;

/// Smallest region size accepted from `ShenandoahHeapRegionSize`
pub const MIN_REGION_SIZE: usize = 4 * KB;
/// Ergonomic region size bounds
pub const MIN_ERGONOMIC_REGION_SIZE: usize = 256 * KB;
pub const MAX_REGION_SIZE: usize = 32 * MB;
/// Ergonomic target number of regions
pub const TARGET_REGION_COUNT: usize = 2048;
/// The heap must hold at least this many regions
pub const MIN_REGION_COUNT: usize = 8;

/// Heuristics mode selected by `-XX:ShenandoahGCHeuristics`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeuristicsMode {
    /// Tunes its free threshold from cycle outcomes
    Adaptive,
    /// Fixed occupancy thresholds
    Static,
    /// Footprint first: frequent cycles, uncommit
    Compact,
    /// Back-to-back cycles evacuating everything (stress)
    Aggressive,
    /// Stop-the-world collections only
    Passive,
    /// Back-to-back cycles with the static collection-set policy
    Continuous,
}

impl HeuristicsMode {
    pub const ALL: [HeuristicsMode; 6] = [
        HeuristicsMode::Adaptive,
        HeuristicsMode::Static,
        HeuristicsMode::Compact,
        HeuristicsMode::Aggressive,
        HeuristicsMode::Passive,
        HeuristicsMode::Continuous,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HeuristicsMode::Adaptive => "adaptive",
            HeuristicsMode::Static => "static",
            HeuristicsMode::Compact => "compact",
            HeuristicsMode::Aggressive => "aggressive",
            HeuristicsMode::Passive => "passive",
            HeuristicsMode::Continuous => "continuous",
        }
    }

    /// Modes that need `UnlockDiagnosticVMOptions`
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, HeuristicsMode::Aggressive | HeuristicsMode::Passive)
    }

    /// Modes that need `UnlockExperimentalVMOptions`
    pub fn is_experimental(&self) -> bool {
        matches!(self, HeuristicsMode::Continuous)
    }
}

impl fmt::Display for HeuristicsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HeuristicsMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HeuristicsMode::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| ConfigError::UnknownHeuristics(s.to_string()))
    }
}

/// Per-kind barrier toggles
///
/// Bit order used by [`BarrierFlags::from_bits`]: SATB, Write, Read, CAS,
/// Acmp, Clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierFlags {
    pub satb: bool,
    pub write: bool,
    pub read: bool,
    pub cas: bool,
    pub acmp: bool,
    pub clone: bool,
}

impl BarrierFlags {
    pub const COMBINATIONS: u8 = 64;

    pub fn all_enabled() -> Self {
        Self::from_bits(0b11_1111)
    }

    pub fn all_disabled() -> Self {
        Self::from_bits(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            satb: bits & 1 != 0,
            write: bits & 2 != 0,
            read: bits & 4 != 0,
            cas: bits & 8 != 0,
            acmp: bits & 16 != 0,
            clone: bits & 32 != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        (self.satb as u8)
            | (self.write as u8) << 1
            | (self.read as u8) << 2
            | (self.cas as u8) << 3
            | (self.acmp as u8) << 4
            | (self.clone as u8) << 5
    }

    /// `-XX:` option strings reproducing these toggles
    pub fn to_options(&self) -> Vec<String> {
        let sign = |on: bool| if on { '+' } else { '-' };
        vec![
            format!("-XX:{}ShenandoahSATBBarrier", sign(self.satb)),
            format!("-XX:{}ShenandoahWriteBarrier", sign(self.write)),
            format!("-XX:{}ShenandoahReadBarrier", sign(self.read)),
            format!("-XX:{}ShenandoahCASBarrier", sign(self.cas)),
            format!("-XX:{}ShenandoahAcmpBarrier", sign(self.acmp)),
            format!("-XX:{}ShenandoahCloneBarrier", sign(self.clone)),
        ]
    }
}

impl Default for BarrierFlags {
    fn default() -> Self {
        Self::all_enabled()
    }
}

/// Main configuration for the collector
///
/// # Examples
///
/// ```rust
/// use sgc::config::{GcConfig, HeuristicsMode, MB};
///
/// let config = GcConfig::from_vm_options(&[
///     "-Xmx64m",
///     "-XX:ShenandoahGCHeuristics=compact",
///     "-XX:-ClassUnloading",
/// ])
/// .unwrap();
///
/// assert_eq!(config.max_heap_size, 64 * MB);
/// assert_eq!(config.heuristics, HeuristicsMode::Compact);
/// assert!(!config.class_unloading);
/// assert!(config.is_explicit("ClassUnloading"));
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Maximum heap size in bytes (`-Xmx`)
    ///
    /// Default: 128MB
    pub max_heap_size: usize,

    /// Initially committed heap in bytes (`-Xms`)
    ///
    /// Regions past this size start uncommitted. Commit is accounting only.
    /// Default: max_heap_size
    pub initial_heap_size: usize,

    /// Region size in bytes (`ShenandoahHeapRegionSize`)
    ///
    /// Default: None, meaning max_heap_size / 2048 clamped to 256KB..32MB
    pub region_size: Option<usize>,

    /// Heuristics mode
    ///
    /// Default: adaptive
    pub heuristics: HeuristicsMode,

    /// Region garbage percentage that makes a region a cset candidate
    ///
    /// Default: 60
    pub garbage_threshold: usize,

    /// Free-space percentage under which static heuristics start a cycle
    ///
    /// Default: 10
    pub free_threshold: usize,

    /// Initial adaptive free threshold
    ///
    /// Default: 70
    pub init_free_threshold: usize,

    /// Lower bound for the adaptive free threshold
    ///
    /// Default: 10
    pub min_free_threshold: usize,

    /// Upper bound for the adaptive free threshold
    ///
    /// Default: 70
    pub max_free_threshold: usize,

    /// Percentage of heap allocated since the last cycle that triggers one
    ///
    /// 0 disables the allocation trigger.
    /// Default: 0
    pub allocation_threshold: usize,

    /// Immediate garbage percentage above which no cset is selected
    ///
    /// Default: 90
    pub immediate_threshold: usize,

    /// Successful cycles in a row before adaptive lowers its threshold
    ///
    /// Default: 3
    pub happy_cycles_threshold: usize,

    /// Maximum time between cycles in milliseconds, 0 disables
    ///
    /// Default: 300000 (5 minutes)
    pub guaranteed_gc_interval_ms: u64,

    /// Degenerated cycles in a row after which Full GC is used
    ///
    /// Default: 3
    pub full_gc_threshold: usize,

    /// Percentage of capacity reserved for evacuation
    ///
    /// Default: 5
    pub evac_reserve: usize,

    /// Allow evacuation to take regions from the mutator view
    ///
    /// Default: true
    pub evac_reserve_overflow: bool,

    /// Allow mutator and collector allocations to share a region
    ///
    /// Default: true
    pub allow_mixed_allocs: bool,

    /// Enable class unloading (`ClassUnloading`)
    ///
    /// Default: true
    pub class_unloading: bool,

    /// Allow concurrent cycles to unload classes
    ///
    /// Full GC unloads whenever `class_unloading` is set.
    /// Default: true
    pub class_unloading_with_concurrent_mark: bool,

    /// Unload classes every Nth concurrent cycle, 0 never
    ///
    /// Default: 5
    pub unload_classes_frequency: usize,

    /// Explicit GC runs a concurrent cycle instead of Full GC
    ///
    /// Default: false
    pub explicit_gc_invokes_concurrent: bool,

    /// Ignore explicit GC requests
    ///
    /// Default: false
    pub disable_explicit_gc: bool,

    /// Barrier toggles
    ///
    /// Default: all enabled
    pub barriers: BarrierFlags,

    /// Allocation pacing
    ///
    /// Default: true
    pub pacing: bool,

    /// Longest single pacing stall in milliseconds
    ///
    /// Default: 10
    pub pacing_max_delay_ms: u64,

    /// Verify the heap at pause boundaries (`ShenandoahVerify`)
    ///
    /// Default: false
    pub verify: bool,

    /// Thread-local allocation buffers (`UseTLAB`)
    ///
    /// Default: true
    pub use_tlab: bool,

    /// Shrink LAB requests to fit the region remainder
    ///
    /// Default: true
    pub elastic_tlab: bool,

    /// Smallest LAB in bytes
    ///
    /// Default: 2KB
    pub min_tlab_size: usize,

    /// Largest LAB in bytes, capped at one region
    ///
    /// Default: None, meaning region size / 8
    pub max_tlab_size: Option<usize>,

    /// Object size, as percentage of a region, above which allocation is humongous
    ///
    /// Default: 100
    pub humongous_threshold: usize,

    /// Uncommit regions that stay empty
    ///
    /// Default: false (compact turns it on)
    pub uncommit: bool,

    /// How long a region stays empty before uncommit, in milliseconds
    ///
    /// Default: 300000
    pub uncommit_delay_ms: u64,

    /// Workers for concurrent phases (`ConcGCThreads`)
    ///
    /// Default: None, meaning (parallel + 3) / 4
    pub conc_gc_threads: Option<usize>,

    /// Workers for pauses (`ParallelGCThreads`)
    ///
    /// Default: None, meaning CPU count up to 8, then 5/8 of the rest
    pub parallel_gc_threads: Option<usize>,

    /// SATB buffer capacity in entries
    ///
    /// Default: 1024
    pub satb_buffer_size: usize,

    /// Control thread idle sleep in milliseconds
    ///
    /// Default: 10
    pub control_interval_ms: u64,

    /// Sample region counters from the control thread
    ///
    /// Default: false
    pub region_sampling: bool,

    /// Region sampling period in milliseconds
    ///
    /// Default: 40
    pub region_sampling_rate_ms: u64,

    /// Seed for heuristics randomness
    ///
    /// Default: 1234567
    pub random_seed: u64,

    /// `-XX:+UnlockDiagnosticVMOptions`
    pub unlock_diagnostic: bool,

    /// `-XX:+UnlockExperimentalVMOptions`
    pub unlock_experimental: bool,

    /// `-XX:+IgnoreUnrecognizedVMOptions`
    pub ignore_unrecognized: bool,

    /// Print cycle events to the console (`-verbose:gc`)
    ///
    /// Default: false
    pub verbose: bool,

    /// Print collector statistics at exit (`PrintGCDetails`)
    ///
    /// Default: false
    pub print_gc_details: bool,

    /// Emit console events as JSON lines
    ///
    /// Default: false
    pub log_json: bool,

    /// Flags set explicitly by options, in the order they were seen
    pub explicit_flags: IndexSet<String>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_heap_size: 128 * MB,
            initial_heap_size: 128 * MB,
            region_size: None,
            heuristics: HeuristicsMode::Adaptive,
            garbage_threshold: 60,
            free_threshold: 10,
            init_free_threshold: 70,
            min_free_threshold: 10,
            max_free_threshold: 70,
            allocation_threshold: 0,
            immediate_threshold: 90,
            happy_cycles_threshold: 3,
            guaranteed_gc_interval_ms: 300_000,
            full_gc_threshold: 3,
            evac_reserve: 5,
            evac_reserve_overflow: true,
            allow_mixed_allocs: true,
            class_unloading: true,
            class_unloading_with_concurrent_mark: true,
            unload_classes_frequency: 5,
            explicit_gc_invokes_concurrent: false,
            disable_explicit_gc: false,
            barriers: BarrierFlags::all_enabled(),
            pacing: true,
            pacing_max_delay_ms: 10,
            verify: false,
            use_tlab: true,
            elastic_tlab: true,
            min_tlab_size: 2 * KB,
            max_tlab_size: None,
            humongous_threshold: 100,
            uncommit: false,
            uncommit_delay_ms: 300_000,
            conc_gc_threads: None,
            parallel_gc_threads: None,
            satb_buffer_size: 1024,
            control_interval_ms: 10,
            region_sampling: false,
            region_sampling_rate_ms: 40,
            random_seed: 1_234_567,
            unlock_diagnostic: false,
            unlock_experimental: false,
            ignore_unrecognized: false,
            verbose: false,
            print_gc_details: false,
            log_json: false,
            explicit_flags: IndexSet::new(),
        }
    }
}

impl GcConfig {
    /// Build a configuration from JVM-style options
    ///
    /// Unlock and ignore flags are honoured wherever they appear in the list.
    pub fn from_vm_options<S: AsRef<str>>(options: &[S]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_vm_options(options)?;
        Ok(config)
    }

    /// Apply JVM-style options on top of this configuration
    pub fn apply_vm_options<S: AsRef<str>>(&mut self, options: &[S]) -> Result<(), ConfigError> {
        for opt in options {
            match opt.as_ref() {
                "-XX:+UnlockDiagnosticVMOptions" => self.unlock_diagnostic = true,
                "-XX:+UnlockExperimentalVMOptions" => self.unlock_experimental = true,
                "-XX:+IgnoreUnrecognizedVMOptions" => self.ignore_unrecognized = true,
                _ => {}
            }
        }
        for opt in options {
            self.set(opt.as_ref())?;
        }
        Ok(())
    }

    /// Apply a single option
    pub fn set(&mut self, option: &str) -> Result<(), ConfigError> {
        if let Some(size) = option.strip_prefix("-Xmx") {
            self.max_heap_size = parse_size(size)?;
            if !self.is_explicit("InitialHeapSize") {
                self.initial_heap_size = self.max_heap_size;
            }
            self.explicit_flags.insert("MaxHeapSize".to_string());
            return Ok(());
        }
        if let Some(size) = option.strip_prefix("-Xms") {
            self.initial_heap_size = parse_size(size)?;
            self.explicit_flags.insert("InitialHeapSize".to_string());
            return Ok(());
        }
        if option == "-verbose:gc" {
            self.verbose = true;
            return Ok(());
        }
        let Some(body) = option.strip_prefix("-XX:") else {
            return self.unrecognized(option);
        };

        let (name, value) = if let Some(name) = body.strip_prefix('+') {
            (name, FlagValue::Bool(true))
        } else if let Some(name) = body.strip_prefix('-') {
            (name, FlagValue::Bool(false))
        } else if let Some((name, raw)) = body.split_once('=') {
            (name, FlagValue::Text(raw.to_string()))
        } else {
            return Err(ConfigError::MalformedOption(option.to_string()));
        };

        let Some(def) = FLAGS.get(name) else {
            return self.unrecognized(option);
        };

        match def.gate {
            FlagGate::Diagnostic if !self.unlock_diagnostic => {
                return Err(ConfigError::LockedFlag {
                    flag: name.to_string(),
                    unlock: "UnlockDiagnosticVMOptions",
                });
            }
            FlagGate::Experimental if !self.unlock_experimental => {
                return Err(ConfigError::LockedFlag {
                    flag: name.to_string(),
                    unlock: "UnlockExperimentalVMOptions",
                });
            }
            _ => {}
        }

        match (&def.setter, value) {
            (Setter::Bool(apply), FlagValue::Bool(on)) => apply(self, on),
            (Setter::Bool(apply), FlagValue::Text(raw)) => apply(self, parse_bool(name, &raw)?),
            (Setter::Uint(apply), FlagValue::Text(raw)) => {
                let v = raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    flag: name.to_string(),
                    value: raw.clone(),
                })?;
                apply(self, v)
            }
            (Setter::Size(apply), FlagValue::Text(raw)) => apply(self, parse_size(&raw)?),
            (Setter::Text(apply), FlagValue::Text(raw)) => apply(self, &raw)?,
            _ => return Err(ConfigError::MalformedOption(option.to_string())),
        }

        self.explicit_flags.insert(name.to_string());
        Ok(())
    }

    /// Diagnostic and experimental modes need their unlock flag
    fn check_mode_unlocked(&self, mode: HeuristicsMode) -> Result<(), ConfigError> {
        let unlock = if mode.is_diagnostic() && !self.unlock_diagnostic {
            "UnlockDiagnosticVMOptions"
        } else if mode.is_experimental() && !self.unlock_experimental {
            "UnlockExperimentalVMOptions"
        } else {
            return Ok(());
        };
        Err(ConfigError::LockedFlag {
            flag: format!("ShenandoahGCHeuristics={}", mode),
            unlock,
        })
    }

    fn unrecognized(&self, option: &str) -> Result<(), ConfigError> {
        if self.ignore_unrecognized {
            log::warn!("Ignoring unrecognized VM option '{}'", option);
            Ok(())
        } else {
            Err(ConfigError::UnknownFlag(option.to_string()))
        }
    }

    /// Was this flag set explicitly by an option?
    pub fn is_explicit(&self, flag: &str) -> bool {
        self.explicit_flags.contains(flag)
    }

    /// Region size in bytes after ergonomics
    pub fn region_size_bytes(&self) -> usize {
        match self.region_size {
            Some(size) => size,
            None => (self.max_heap_size / TARGET_REGION_COUNT)
                .max(1)
                .next_power_of_two()
                .clamp(MIN_ERGONOMIC_REGION_SIZE, MAX_REGION_SIZE),
        }
    }

    /// Number of regions the heap is split into
    pub fn region_count(&self) -> usize {
        self.max_heap_size / self.region_size_bytes()
    }

    /// Workers used by pauses
    pub fn parallel_workers(&self) -> usize {
        self.parallel_gc_threads.unwrap_or_else(|| {
            let cpus = num_cpus::get().max(1);
            if cpus <= 8 {
                cpus
            } else {
                8 + (cpus - 8) * 5 / 8
            }
        })
    }

    /// Workers used by concurrent phases
    pub fn concurrent_workers(&self) -> usize {
        self.conc_gc_threads
            .unwrap_or_else(|| ((self.parallel_workers() + 3) / 4).max(1))
    }

    /// Largest LAB in bytes
    pub fn max_tlab_bytes(&self) -> usize {
        let region = self.region_size_bytes();
        self.max_tlab_size.unwrap_or(region / 8).min(region)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(size) = self.region_size {
            if !size.is_power_of_two() || size < MIN_REGION_SIZE || size > MAX_REGION_SIZE {
                return Err(ConfigError::InvalidRegionSize(format!(
                    "region size {} must be a power of two between {} and {}",
                    size, MIN_REGION_SIZE, MAX_REGION_SIZE
                )));
            }
        }

        let region = self.region_size_bytes();
        if self.max_heap_size % region != 0 {
            return Err(ConfigError::InvalidHeapSize(format!(
                "max heap {} is not a multiple of region size {}",
                self.max_heap_size, region
            )));
        }
        if self.region_count() < MIN_REGION_COUNT {
            return Err(ConfigError::InvalidHeapSize(format!(
                "max heap {} holds fewer than {} regions of {} bytes",
                self.max_heap_size, MIN_REGION_COUNT, region
            )));
        }
        if self.initial_heap_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "initial heap size must be <= max heap size".to_string(),
            ));
        }

        for (flag, value) in [
            ("ShenandoahGarbageThreshold", self.garbage_threshold),
            ("ShenandoahFreeThreshold", self.free_threshold),
            ("ShenandoahInitFreeThreshold", self.init_free_threshold),
            ("ShenandoahMinFreeThreshold", self.min_free_threshold),
            ("ShenandoahMaxFreeThreshold", self.max_free_threshold),
            ("ShenandoahAllocationThreshold", self.allocation_threshold),
            ("ShenandoahImmediateThreshold", self.immediate_threshold),
            ("ShenandoahEvacReserve", self.evac_reserve),
        ] {
            if value > 100 {
                return Err(ConfigError::InvalidThreshold(format!(
                    "{} must be a percentage, got {}",
                    flag, value
                )));
            }
        }
        if self.min_free_threshold > self.max_free_threshold {
            return Err(ConfigError::InvalidThreshold(
                "ShenandoahMinFreeThreshold must be <= ShenandoahMaxFreeThreshold".to_string(),
            ));
        }
        if self.humongous_threshold == 0 || self.humongous_threshold > 100 {
            return Err(ConfigError::InvalidThreshold(
                "ShenandoahHumongousThreshold must be in 1..=100".to_string(),
            ));
        }

        if self.satb_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "ShenandoahSATBBufferSize".to_string(),
                value: "0".to_string(),
            });
        }
        if self.conc_gc_threads == Some(0) || self.parallel_gc_threads == Some(0) {
            return Err(ConfigError::InvalidGcThreads(
                "worker counts must be > 0".to_string(),
            ));
        }
        if self.min_tlab_size == 0 || self.min_tlab_size > self.max_tlab_bytes() {
            return Err(ConfigError::InvalidTlabSize(format!(
                "MinTLABSize {} must be in 1..={}",
                self.min_tlab_size,
                self.max_tlab_bytes()
            )));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - SGC_MAX_HEAP (bytes or with k/m/g suffix)
    /// - SGC_HEURISTICS
    /// - SGC_VERIFY
    /// - SGC_RANDOM_SEED
    /// - SGC_LOG_JSON
    /// - SGC_OPTS (whitespace separated VM options, applied last)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SGC_MAX_HEAP") {
            config.set(&format!("-Xmx{}", val))?;
        }

        if let Ok(val) = std::env::var("SGC_HEURISTICS") {
            config.heuristics = val.parse()?;
            config.unlock_diagnostic |= config.heuristics.is_diagnostic();
            config.unlock_experimental |= config.heuristics.is_experimental();
            config.explicit_flags.insert("ShenandoahGCHeuristics".to_string());
        }

        if let Ok(val) = std::env::var("SGC_VERIFY") {
            config.verify = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Ok(val) = std::env::var("SGC_RANDOM_SEED") {
            if let Ok(seed) = val.parse::<u64>() {
                config.random_seed = seed;
            }
        }

        if let Ok(val) = std::env::var("SGC_LOG_JSON") {
            config.log_json = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Ok(val) = std::env::var("SGC_OPTS") {
            let opts: Vec<&str> = val.split_whitespace().collect();
            config.apply_vm_options(&opts)?;
        }

        Ok(config)
    }
}

// ============================================================================
// FLAG TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagGate {
    Product,
    Diagnostic,
    Experimental,
}

enum Setter {
    Bool(fn(&mut GcConfig, bool)),
    Uint(fn(&mut GcConfig, u64)),
    Size(fn(&mut GcConfig, usize)),
    Text(fn(&mut GcConfig, &str) -> Result<(), ConfigError>),
}

struct FlagSpec {
    gate: FlagGate,
    setter: Setter,
}

enum FlagValue {
    Bool(bool),
    Text(String),
}

fn flag(gate: FlagGate, setter: Setter) -> FlagSpec {
    FlagSpec { gate, setter }
}

lazy_static! {
    static ref FLAGS: IndexMap<&'static str, FlagSpec> = {
        use FlagGate::*;
        let mut m = IndexMap::new();

        m.insert("UseShenandoahGC", flag(Product, Setter::Bool(|_, _| {})));
        m.insert("UnlockDiagnosticVMOptions", flag(Product, Setter::Bool(|c, v| c.unlock_diagnostic = v)));
        m.insert("UnlockExperimentalVMOptions", flag(Product, Setter::Bool(|c, v| c.unlock_experimental = v)));
        m.insert("IgnoreUnrecognizedVMOptions", flag(Product, Setter::Bool(|c, v| c.ignore_unrecognized = v)));
        m.insert("PrintGCDetails", flag(Product, Setter::Bool(|c, v| c.print_gc_details = v)));
        m.insert("MaxHeapSize", flag(Product, Setter::Size(|c, v| c.max_heap_size = v)));
        m.insert("InitialHeapSize", flag(Product, Setter::Size(|c, v| c.initial_heap_size = v)));
        m.insert("UseTLAB", flag(Product, Setter::Bool(|c, v| c.use_tlab = v)));
        m.insert("MinTLABSize", flag(Product, Setter::Size(|c, v| c.min_tlab_size = v)));
        m.insert("ClassUnloading", flag(Product, Setter::Bool(|c, v| c.class_unloading = v)));
        m.insert("ClassUnloadingWithConcurrentMark", flag(Product, Setter::Bool(|c, v| c.class_unloading_with_concurrent_mark = v)));
        m.insert("ExplicitGCInvokesConcurrent", flag(Product, Setter::Bool(|c, v| c.explicit_gc_invokes_concurrent = v)));
        m.insert("DisableExplicitGC", flag(Product, Setter::Bool(|c, v| c.disable_explicit_gc = v)));
        m.insert("ConcGCThreads", flag(Product, Setter::Uint(|c, v| c.conc_gc_threads = Some(v as usize))));
        m.insert("ParallelGCThreads", flag(Product, Setter::Uint(|c, v| c.parallel_gc_threads = Some(v as usize))));

        m.insert("ShenandoahGCHeuristics", flag(Product, Setter::Text(|c, v| {
            let mode: HeuristicsMode = v.parse()?;
            c.check_mode_unlocked(mode)?;
            c.heuristics = mode;
            Ok(())
        })));
        m.insert("ShenandoahHeapRegionSize", flag(Experimental, Setter::Size(|c, v| c.region_size = Some(v))));
        m.insert("ShenandoahGarbageThreshold", flag(Experimental, Setter::Uint(|c, v| c.garbage_threshold = v as usize)));
        m.insert("ShenandoahFreeThreshold", flag(Experimental, Setter::Uint(|c, v| c.free_threshold = v as usize)));
        m.insert("ShenandoahInitFreeThreshold", flag(Experimental, Setter::Uint(|c, v| c.init_free_threshold = v as usize)));
        m.insert("ShenandoahMinFreeThreshold", flag(Experimental, Setter::Uint(|c, v| c.min_free_threshold = v as usize)));
        m.insert("ShenandoahMaxFreeThreshold", flag(Experimental, Setter::Uint(|c, v| c.max_free_threshold = v as usize)));
        m.insert("ShenandoahAllocationThreshold", flag(Experimental, Setter::Uint(|c, v| c.allocation_threshold = v as usize)));
        m.insert("ShenandoahImmediateThreshold", flag(Experimental, Setter::Uint(|c, v| c.immediate_threshold = v as usize)));
        m.insert("ShenandoahHappyCyclesThreshold", flag(Experimental, Setter::Uint(|c, v| c.happy_cycles_threshold = v as usize)));
        m.insert("ShenandoahGuaranteedGCInterval", flag(Experimental, Setter::Uint(|c, v| c.guaranteed_gc_interval_ms = v)));
        m.insert("ShenandoahFullGCThreshold", flag(Experimental, Setter::Uint(|c, v| c.full_gc_threshold = v as usize)));
        m.insert("ShenandoahEvacReserve", flag(Experimental, Setter::Uint(|c, v| c.evac_reserve = v as usize)));
        m.insert("ShenandoahEvacReserveOverflow", flag(Experimental, Setter::Bool(|c, v| c.evac_reserve_overflow = v)));
        m.insert("ShenandoahAllowMixedAllocs", flag(Experimental, Setter::Bool(|c, v| c.allow_mixed_allocs = v)));
        m.insert("ShenandoahUnloadClassesFrequency", flag(Experimental, Setter::Uint(|c, v| c.unload_classes_frequency = v as usize)));
        m.insert("ShenandoahPacing", flag(Experimental, Setter::Bool(|c, v| c.pacing = v)));
        m.insert("ShenandoahPacingMaxDelay", flag(Experimental, Setter::Uint(|c, v| c.pacing_max_delay_ms = v)));
        m.insert("ShenandoahHumongousThreshold", flag(Experimental, Setter::Uint(|c, v| c.humongous_threshold = v as usize)));
        m.insert("ShenandoahUncommit", flag(Experimental, Setter::Bool(|c, v| c.uncommit = v)));
        m.insert("ShenandoahUncommitDelay", flag(Experimental, Setter::Uint(|c, v| c.uncommit_delay_ms = v)));
        m.insert("ShenandoahSATBBufferSize", flag(Experimental, Setter::Uint(|c, v| c.satb_buffer_size = v as usize)));
        m.insert("ShenandoahControlInterval", flag(Experimental, Setter::Uint(|c, v| c.control_interval_ms = v)));
        m.insert("ShenandoahRegionSampling", flag(Experimental, Setter::Bool(|c, v| c.region_sampling = v)));
        m.insert("ShenandoahRegionSamplingRate", flag(Experimental, Setter::Uint(|c, v| c.region_sampling_rate_ms = v)));
        m.insert("ShenandoahMaxTLABSize", flag(Experimental, Setter::Size(|c, v| c.max_tlab_size = Some(v))));

        m.insert("ShenandoahVerify", flag(Diagnostic, Setter::Bool(|c, v| c.verify = v)));
        m.insert("ShenandoahElasticTLAB", flag(Diagnostic, Setter::Bool(|c, v| c.elastic_tlab = v)));
        m.insert("ShenandoahSATBBarrier", flag(Diagnostic, Setter::Bool(|c, v| c.barriers.satb = v)));
        m.insert("ShenandoahWriteBarrier", flag(Diagnostic, Setter::Bool(|c, v| c.barriers.write = v)));
        m.insert("ShenandoahReadBarrier", flag(Diagnostic, Setter::Bool(|c, v| c.barriers.read = v)));
        m.insert("ShenandoahCASBarrier", flag(Diagnostic, Setter::Bool(|c, v| c.barriers.cas = v)));
        m.insert("ShenandoahAcmpBarrier", flag(Diagnostic, Setter::Bool(|c, v| c.barriers.acmp = v)));
        m.insert("ShenandoahCloneBarrier", flag(Diagnostic, Setter::Bool(|c, v| c.barriers.clone = v)));

        m
    };
}

/// Names of every recognised `-XX` flag, in table order
pub fn known_flags() -> impl Iterator<Item = &'static str> {
    FLAGS.keys().copied()
}

/// Parse a size with optional k/m/g suffix
pub fn parse_size(raw: &str) -> Result<usize, ConfigError> {
    let raw = raw.trim();
    let (digits, scale) = match raw.chars().last() {
        Some('k') | Some('K') => (&raw[..raw.len() - 1], KB),
        Some('m') | Some('M') => (&raw[..raw.len() - 1], MB),
        Some('g') | Some('G') => (&raw[..raw.len() - 1], GB),
        _ => (raw, 1),
    };
    digits
        .parse::<usize>()
        .ok()
        .and_then(|v| v.checked_mul(scale))
        .ok_or_else(|| ConfigError::InvalidSize(raw.to_string()))
}

fn parse_bool(flag: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unrecognized VM option '{0}'")]
    UnknownFlag(String),

    #[error("Malformed VM option '{0}'")]
    MalformedOption(String),

    #[error("VM option '{flag}' is locked, add -XX:+{unlock} to unlock it")]
    LockedFlag { flag: String, unlock: &'static str },

    #[error("Improperly specified VM option '{flag}={value}'")]
    InvalidValue { flag: String, value: String },

    #[error("Invalid size '{0}'")]
    InvalidSize(String),

    #[error("Unknown heuristics mode '{0}'")]
    UnknownHeuristics(String),

    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid region size: {0}")]
    InvalidRegionSize(String),

    #[error("Invalid TLAB size: {0}")]
    InvalidTlabSize(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid GC threads: {0}")]
    InvalidGcThreads(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heuristics, HeuristicsMode::Adaptive);
        assert_eq!(config.barriers, BarrierFlags::all_enabled());
        assert_eq!(config.region_size_bytes(), 256 * KB);
        assert_eq!(config.region_count(), 512);
    }

    #[test]
    fn test_region_size_ergonomics() {
        let config = GcConfig {
            max_heap_size: 8 * GB,
            initial_heap_size: 8 * GB,
            ..Default::default()
        };
        assert_eq!(config.region_size_bytes(), 4 * MB);

        let small = GcConfig {
            max_heap_size: 16 * MB,
            initial_heap_size: 16 * MB,
            ..Default::default()
        };
        assert_eq!(small.region_size_bytes(), 256 * KB);
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(parse_size("128m").unwrap(), 128 * MB);
        assert_eq!(parse_size("1G").unwrap(), GB);
        assert_eq!(parse_size("512k").unwrap(), 512 * KB);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_vm_options_roundtrip_barriers() {
        let mut opts = vec![
            "-XX:+UnlockDiagnosticVMOptions".to_string(),
            "-XX:+UnlockExperimentalVMOptions".to_string(),
            "-XX:ShenandoahGCHeuristics=passive".to_string(),
        ];
        let flags = BarrierFlags::from_bits(0b10_0101);
        opts.extend(flags.to_options());

        let config = GcConfig::from_vm_options(&opts).unwrap();
        assert_eq!(config.barriers, flags);
        assert!(config.is_explicit("ShenandoahCloneBarrier"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_diagnostic_flag_requires_unlock() {
        let err = GcConfig::from_vm_options(&["-XX:-ShenandoahSATBBarrier"]).unwrap_err();
        assert!(matches!(err, ConfigError::LockedFlag { .. }));

        let err = GcConfig::from_vm_options(&["-XX:ShenandoahGCHeuristics=passive"]).unwrap_err();
        assert!(matches!(err, ConfigError::LockedFlag { .. }));
        let config = GcConfig::from_vm_options(&[
            "-XX:ShenandoahGCHeuristics=passive",
            "-XX:+UnlockDiagnosticVMOptions",
        ])
        .unwrap();
        assert_eq!(config.heuristics, HeuristicsMode::Passive);
    }

    #[test]
    fn test_unknown_flag_and_ignore() {
        assert!(GcConfig::from_vm_options(&["-XX:+NoSuchFlag"]).is_err());
        let config = GcConfig::from_vm_options(&[
            "-XX:+NoSuchFlag",
            "-XX:+IgnoreUnrecognizedVMOptions",
        ])
        .unwrap();
        assert!(config.ignore_unrecognized);
    }

    #[test]
    fn test_xmx_sets_initial_unless_xms() {
        let config = GcConfig::from_vm_options(&["-Xms32m", "-Xmx64m"]).unwrap();
        assert_eq!(config.initial_heap_size, 32 * MB);
        assert_eq!(config.max_heap_size, 64 * MB);

        let config = GcConfig::from_vm_options(&["-Xmx64m"]).unwrap();
        assert_eq!(config.initial_heap_size, 64 * MB);
    }

    #[test]
    fn test_invalid_thresholds() {
        let config = GcConfig {
            min_free_threshold: 80,
            max_free_threshold: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GcConfig {
            region_size: Some(3000),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heuristics_names() {
        for mode in HeuristicsMode::ALL {
            assert_eq!(mode.name().parse::<HeuristicsMode>().unwrap(), mode);
        }
        assert!("generational".parse::<HeuristicsMode>().is_err());
    }
}
