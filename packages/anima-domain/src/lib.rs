pub mod feedback;
pub mod frames;

pub use feedback::{
	CorpusSource, FeedbackCategory, FeedbackItem, FeedbackSeverity, FeedbackType, TextPosition,
	decode_feedback_item, extract_feedback_values,
};
pub use frames::Frame;
