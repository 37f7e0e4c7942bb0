pub mod admin;
pub mod potluck;
pub mod proxy;

pub use admin::admin_router;
pub use potluck::potluck_router;
pub use proxy::proxy_router;
