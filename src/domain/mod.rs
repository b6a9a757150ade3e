//! Domain layer types for the merge engine.
//!
//! Records are plain values owned by callers; the engine only reads and
//! clones them.

mod email;
mod types;

pub use email::{parse_mail_date, AttachmentDescriptor, EmailRecord};
pub use types::{MessageId, RecordId};
