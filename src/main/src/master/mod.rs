pub mod m_metrics_http;
pub mod m_scrape_manager;
pub mod scrape_metrics;
pub mod scraper;
