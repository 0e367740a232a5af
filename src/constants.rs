//! Application constants

/// Relative positions within a video at which frames are sampled
pub const DEFAULT_SAMPLE_OFFSETS: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

/// Average confidence above which a video is flagged as synthetic
pub const AVERAGE_THRESHOLD: u8 = 50;

/// Single-frame confidence above which a video is flagged as synthetic
pub const PEAK_THRESHOLD: u8 = 75;

/// Number of records shown in the recent-history view
pub const RECENT_HISTORY_LIMIT: usize = 3;

/// Maximum upload size for analysis requests (200 MB)
pub const MAX_ANALYZE_UPLOAD_SIZE: usize = 200 * 1024 * 1024;

pub const LABEL_SYNTHETIC: &str = "synthetic content detected";
pub const LABEL_AUTHENTIC: &str = "authentic content";

/// Multipart field carrying the media payload, both inbound and to the classifier
pub const FILE_FIELD: &str = "file";

/// File name given to sampled video frames when sent to the classifier
pub const FRAME_FILE_NAME: &str = "frame.jpg";
