use kube::CustomResourceExt;
use worker_operator::WorkerCluster;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&WorkerCluster::crd())?;
    println!("{yaml}");
    Ok(())
}
