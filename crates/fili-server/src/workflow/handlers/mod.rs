//! One module per [`Stage`](super::Stage), outermost first.

mod volatile;
mod partial_data;
mod top_n;
mod date_time_sort;
mod pagination;
mod selector;
mod weight_check;
mod debug;
mod split;
mod cache;
mod druid_partial;
mod web_service;

pub use cache::CacheHandler;
pub use date_time_sort::DateTimeSortHandler;
pub use debug::DebugHandler;
pub use druid_partial::DruidPartialDataHandler;
pub use pagination::PaginationHandler;
pub use partial_data::PartialDataHandler;
pub use selector::WebServiceSelectorHandler;
pub use split::QuerySplitHandler;
pub use top_n::TopNMapperHandler;
pub use volatile::VolatileDataHandler;
pub use weight_check::WeightCheckHandler;
pub use web_service::AsyncWebServiceHandler;
