//! Pipeline constants. Scores are integers in `[SCORE_MIN, SCORE_MAX]`.

/// Lowest publishable credit score.
pub const SCORE_MIN: u16 = 0;

/// Highest publishable credit score.
pub const SCORE_MAX: u16 = 1000;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Largest configurable asset decimal count (`10^77` fits in a u256).
pub const MAX_ASSET_DECIMALS: u32 = 77;

/// First UTC hour (inclusive) of the default night window.
pub const DEFAULT_NIGHT_START_HOUR: u32 = 23;

/// UTC hour (exclusive) at which the default night window ends.
pub const DEFAULT_NIGHT_END_HOUR: u32 = 6;

/// First UTC hour (inclusive) counted as working hours.
pub const WORKHOUR_START_HOUR: u32 = 9;

/// Last UTC hour (inclusive) counted as working hours.
pub const WORKHOUR_END_HOUR: u32 = 17;

/// Mean gap in seconds below which a wallet is flagged as likely automated.
pub const BOT_MAX_MEAN_INTERVAL_SECS: f64 = 60.0;

/// The automation flag needs strictly more gaps than this.
pub const BOT_MIN_INTERVALS: usize = 10;

/// Gap standard deviation below which cadence counts as "regular".
pub const HIGH_FREQUENCY_STDDEV_SECS: f64 = 60.0;

/// Mean gap below which a regular cadence counts as high frequency.
pub const HIGH_FREQUENCY_MEAN_SECS: f64 = 3_600.0;

/// Points subtracted per confirmed liquidation unless configured otherwise.
pub const DEFAULT_LIQUIDATION_PENALTY: f64 = 200.0;

/// Lower clip of the heuristic proxy target.
pub const PROXY_TARGET_MIN: f64 = 300.0;

/// Upper clip of the heuristic proxy target.
pub const PROXY_TARGET_MAX: f64 = 700.0;

/// Neutral starting point of the proxy target before rewards and penalties.
pub const PROXY_BASE_SCORE: f64 = 500.0;

/// In-sample prediction quantile mapped to `SCORE_MIN` during calibration.
pub const CALIBRATION_LOW_QUANTILE: f64 = 0.01;

/// In-sample prediction quantile mapped to `SCORE_MAX` during calibration.
pub const CALIBRATION_HIGH_QUANTILE: f64 = 0.99;

/// Anchors closer than this fall back to the proxy clip band.
pub const CALIBRATION_MIN_SPREAD: f64 = 1e-9;

/// Boosting rounds used when no training parameters are configured.
pub const DEFAULT_BOOSTING_ROUNDS: usize = 500;

/// Shrinkage applied to every tree's output.
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

/// Maximum depth of each regression tree (root is depth 0).
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Minimum number of samples on either side of a split.
pub const DEFAULT_MIN_SAMPLES_LEAF: usize = 2;

/// Smallest loss reduction a tree split must achieve.
pub const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Lower and upper quantiles bounding the scaler's spread statistic.
pub const SCALER_QUANTILE_RANGE: (f64, f64) = (0.25, 0.75);

/// On-disk format version for scaler and model artifacts.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Magic tag written in the scaler artifact header.
pub const SCALER_MAGIC: &str = "LSSC";

/// Magic tag written in the model artifact header.
pub const MODEL_MAGIC: &str = "LSGB";

// --- Overrides ---

/// Wallets with fewer transactions than this get the sparse-history penalty.
pub const SPARSE_HISTORY_MIN_TRANSACTIONS: u64 = 2;

/// Score points subtracted from wallets with a sparse history.
pub const SPARSE_HISTORY_PENALTY: f64 = 50.0;
