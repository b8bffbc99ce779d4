pub(crate) mod sync;
pub mod timer;

#[cfg(test)]
pub mod test_helpers;
