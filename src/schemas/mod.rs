use std::collections::BTreeMap;

pub(crate) mod exam;
pub(crate) mod remote;
pub(crate) mod student;

/// Question id → selected option key.
pub(crate) type AnswerMap = BTreeMap<String, String>;

/// Question id → correct option key.
pub(crate) type SolutionsMap = BTreeMap<String, String>;
