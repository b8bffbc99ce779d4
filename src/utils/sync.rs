pub(crate) mod oneshot;
