pub(crate) mod answers;
pub(crate) mod files;
pub(crate) mod identity;
pub(crate) mod outbox;
