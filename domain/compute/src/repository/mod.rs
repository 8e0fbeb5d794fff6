mod key_value;

#[rustfmt::skip]
pub use {
    key_value::KeyValueStore,
};
