//! Application services layer.

pub mod accounts;
pub mod blog;
pub mod domain_validation;
pub mod error;
pub mod jobs;
pub mod markdown_io;
pub mod pagination;
pub mod posts;
pub mod render;
pub mod repos;
pub mod site;
pub mod sitemap;
pub mod syndication;
pub mod tokens;
pub mod uploads;
