//! The tools offered to the travel assistant.

mod weather;
mod web_search;

pub use weather::{WeatherParameters, WeatherTool};
pub use web_search::{SERP_API_ENDPOINT, WebSearchParameters, WebSearchTool};
