pub(crate) mod countdown;
pub(crate) mod exam_content;
pub(crate) mod exam_session;
pub(crate) mod push_channel;
pub(crate) mod remote_session;
pub(crate) mod results;
pub(crate) mod scoring;
pub(crate) mod submission;
