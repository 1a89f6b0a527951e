use std::time::Duration;

use metrics_statsd::{StatsdBuilder, TagFormat};

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::default()
        .with_remote_address("localhost:9125")
        .with_prefix("demo")
        .with_tag_format(TagFormat::Datadog)
        .with_tags(&["system", "foo"])
        .expect("tags must be key/value pairs")
        .with_error_handler(|e| tracing::warn!(error = %e, "Failed to send metrics."))
        .build_or_mute();

    client.increment("idle_metric");
    client.gauge("testing", 42.0);

    let server = client.with_prefix("tcp_server");
    let sampled = server.with_sample_rate(0.5).expect("sample rate must be within (0, 1]");

    // Loop over and over, pretending to do some work.
    loop {
        let timing = server.new_timing();

        server.increment("loops");
        sampled.histogram("loop_delta_secs", rand::random::<f64>());

        if rand::random::<f64>() < 0.75 {
            server.count_with_tags("lucky_iterations", 1, &["outcome", "lucky"]).expect("tags must be key/value pairs");
        } else {
            server.gauge("unlucky_streak", -1);
        }

        server.unique("workers", "worker-1");

        std::thread::sleep(Duration::from_millis(100));
        timing.send("loop_duration");
    }
}
