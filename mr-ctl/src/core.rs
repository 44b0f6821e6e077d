//
// Import gRPC stubs/definitions.
//
pub mod coordinator {
    tonic::include_proto!("coordinator");
}

use anyhow::{Context, Result};

use coordinator::coordinator_client::CoordinatorClient;
use coordinator::StatusRequest;

pub async fn status(address: &str) -> Result<()> {
    let mut client = CoordinatorClient::connect(address.to_string())
        .await
        .with_context(|| format!("could not reach the coordinator at {address}"))?;
    let request = tonic::Request::new(StatusRequest {});
    let response = client.status(request).await?.into_inner();

    println!("[Status]");
    let state = match (response.done, response.failed) {
        (true, _) => "done",
        (false, true) => "failed",
        (false, false) => "running",
    };
    println!("Job {state}");
    for s in response.data {
        println!("{}", s);
    }

    Ok(())
}
