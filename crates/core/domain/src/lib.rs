pub mod channel;
pub mod data;
pub mod profile;

pub use channel::{ChannelInfo, ChannelMapping, ChannelMetadata, ChannelTableError};
pub use data::{CompletionEvent, FieldValue, Measurement, Record};
pub use profile::{AuthMode, CompletionRule, DeviceProfile, Dialect, PatternField};
