/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
mod flag;
mod timeout;

pub(crate) use flag::Flag;
pub(crate) use timeout::{Timeout, earliest};
