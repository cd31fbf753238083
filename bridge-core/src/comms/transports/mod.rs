#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod zmq;
