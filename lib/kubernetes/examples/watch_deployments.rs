use futures::StreamExt;
use kubernetes::{Client, Config, Deployment, Event, WatchConfig, watcher};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load(None, None).unwrap();
    let client = Client::new(config).unwrap();

    let version = client.version().await.unwrap();
    println!("server version: {}.{}", version.major, version.minor);

    let stream = watcher::<Deployment>(
        client,
        WatchConfig {
            bookmark: true,
            ..Default::default()
        },
    );
    tokio::pin!(stream);

    while let Some(result) = stream.next().await {
        match result {
            Ok(Event::Init) => println!("list start"),
            Ok(Event::InitApply(deployment)) | Ok(Event::Apply(deployment)) => {
                println!(
                    "apply {}/{} available: {}",
                    deployment.metadata.namespace,
                    deployment.metadata.name,
                    deployment.available_replicas()
                );
            }
            Ok(Event::InitDone) => println!("list done"),
            Ok(Event::Deleted(deployment)) => {
                println!(
                    "delete {}/{}",
                    deployment.metadata.namespace, deployment.metadata.name
                );
            }
            Err(err) => {
                println!("watch error: {err}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}
