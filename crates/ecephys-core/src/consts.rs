/// Largest template neighbor count supported by the standard sorter build.
pub const MAX_NEIGHBOR_SITES: u32 = 64;

/// Largest whitening range (sites) the sorter accepts.
pub const MAX_WHITENING_SITES: u32 = 384;

/// Default AP-band sample rate (Hz) when no SpikeGLX metadata is available.
pub const DEFAULT_SAMPLE_RATE: f64 = 30_000.0;

/// LFP-band sample rate (Hz) written into every descriptor.
pub const LFP_SAMPLE_RATE: f64 = 2_500.0;

/// Default saved channel count (384 sites + 1 sync channel).
pub const DEFAULT_NUM_CHANNELS: u32 = 385;

/// Default reference channel for 1.0-family probes.
pub const DEFAULT_REFERENCE_CHANNELS: [u32; 1] = [191];

/// Default microvolts per bit (NP1.0, AP gain 500).
pub const DEFAULT_UV_PER_BIT: f64 = 2.34375;

/// Probe type assumed when no metadata is available.
pub const DEFAULT_PROBE_TYPE: &str = "NP1";

/// Region used when a session does not name one for a probe.
pub const DEFAULT_REGION: &str = "cortex";

/// Whole-recording sorting time range.
pub const FULL_TIME_RANGE: &str = "[0 Inf]";

/// Header row of every session run log.
pub const RUN_LOG_HEADER: &str = "Index,File,Sort_Error,Sort_Error_Description";

/// Environment variable that overrides the sorter scratch directory.
pub const KS_TMP_OVERRIDE_ENV: &str = "KS_OUT_TMP_OVERRIDE";

/// Streams concatenated for the probe that also carries the NI stream.
pub const NI_STREAM_STRING: &str = "-ni -ap -lf";

/// Streams concatenated for every other probe.
pub const PROBE_STREAM_STRING: &str = "-ap -lf";

/// Sorter version string written into the sorting parameters.
pub const SORTER_VERSION: &str = "3.0";
