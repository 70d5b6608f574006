mod test_preempt;
pub(crate) mod utils;
