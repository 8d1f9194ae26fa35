use std::time::Duration;

/// Poll `condition` until it holds, panics after `timeout`.
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if condition() {
            return;
        }

        if tokio::time::Instant::now() > deadline {
            panic!("condition not met after {timeout:?}");
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
