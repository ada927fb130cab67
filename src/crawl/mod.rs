pub mod crawler;
pub mod extractor;
pub mod links;
pub mod renderer;
pub mod robots;
pub mod sitemap;
pub mod spa;

pub use crawler::{process_page, CrawlTask};
pub use renderer::Renderer;
pub use robots::RobotsHandler;
