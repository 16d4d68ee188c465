/*!
 * Monitoring
 * Structured tracing for sandbox construction
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, spawn_span, MountTimer, SpawnSpan};
