pub(crate) mod exam_runner;
