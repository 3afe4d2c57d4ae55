pub mod federated_cluster;
pub mod health_check_config;
