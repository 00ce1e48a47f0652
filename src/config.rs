use crate::buffer::{DEFAULT_POOL_SIZE, DEFAULT_REPLACER_K};

use std::sync::LazyLock;

#[allow(non_snake_case)]
pub struct Config {
    // number of frames in the buffer pool
    pub POOL_SIZE: usize,
    // backward window of the LRU-K replacement policy
    pub REPLACER_K: usize,
}

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| Config {
    POOL_SIZE: DEFAULT_POOL_SIZE,
    REPLACER_K: DEFAULT_REPLACER_K,
});
