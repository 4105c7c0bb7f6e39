use tracing::trace;

// Request, flow-duration and poll-progress counters for the studio, emitted
// as trace events on `studio.metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(target = "studio.metrics", route, "requests_total_inc");
}

pub fn step_elapsed(workflow: &'static str, elapsed_ms: u128) {
    trace!(
        target = "studio.metrics",
        workflow = workflow,
        elapsed_ms = elapsed_ms as u64,
        "step_elapsed"
    );
}

pub fn poll_tick(task_id: &str, completed: u32, total: u32) {
    trace!(
        target = "studio.metrics",
        task_id = task_id,
        completed = completed,
        total = total,
        "poll_tick"
    );
}
