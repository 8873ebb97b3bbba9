pub(crate) mod bundler_install_layer;
pub(crate) mod shared;
