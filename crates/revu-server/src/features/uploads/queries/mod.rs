pub mod stream_events;

pub use stream_events::StreamEventsQuery;
