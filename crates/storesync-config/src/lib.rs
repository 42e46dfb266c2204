mod env;
mod tracing_init;

pub use env::AppConfig;
pub use tracing_init::init_tracing;
