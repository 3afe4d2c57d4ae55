use controller::api::federated_cluster::FederatedCluster;
use controller::api::health_check_config::HealthCheckConfig;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&FederatedCluster::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&HealthCheckConfig::crd())?);
    Ok(())
}
