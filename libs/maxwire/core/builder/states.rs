//! Type-state markers for the client builder
//!
//! `build()` only exists once a configuration has been supplied.

use std::marker::PhantomData;

/// Marker trait for configuration state
pub trait ConfigState {}

/// No configuration yet
pub struct NoConfig;
impl ConfigState for NoConfig {}

/// Configuration supplied
pub struct HasConfig;
impl ConfigState for HasConfig {}

#[derive(Debug, Clone, Copy)]
pub struct TypeState<C> {
    _config: PhantomData<C>,
}

impl<C> TypeState<C> {
    pub(crate) fn new() -> Self {
        Self {
            _config: PhantomData,
        }
    }
}

impl<C> Default for TypeState<C> {
    fn default() -> Self {
        Self::new()
    }
}
