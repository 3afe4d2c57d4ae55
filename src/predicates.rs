use kube::runtime::predicates;
use kube::ResourceExt;

/// Trigger on spec changes, and on every update once deletion has started.
pub fn generation_with_deletion(obj: &impl ResourceExt) -> Option<u64> {
    match obj.meta().deletion_timestamp {
        Some(_) => predicates::resource_version(obj),
        None => predicates::generation(obj),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::generation_with_deletion;
    use crate::api::federated_cluster::{FederatedCluster, FederatedClusterSpec};

    fn cluster(generation: i64, resource_version: &str) -> FederatedCluster {
        let mut cluster = FederatedCluster::new(
            "member",
            FederatedClusterSpec {
                api_endpoint: "https://member:6443".to_string(),
                ca_bundle: None,
                secret_ref: Default::default(),
            },
        );
        cluster.metadata.generation = Some(generation);
        cluster.metadata.resource_version = Some(resource_version.to_string());
        cluster
    }

    #[test]
    fn status_writes_do_not_change_the_key() {
        // A status write bumps only the resourceVersion
        assert_eq!(
            generation_with_deletion(&cluster(1, "10")),
            generation_with_deletion(&cluster(1, "11"))
        );
        assert_ne!(
            generation_with_deletion(&cluster(1, "10")),
            generation_with_deletion(&cluster(2, "11"))
        );
    }

    #[test]
    fn deleting_objects_track_every_update() {
        let mut old = cluster(1, "10");
        old.metadata.deletion_timestamp = Some(Time(Utc::now()));
        let mut new = cluster(1, "11");
        new.metadata.deletion_timestamp = old.metadata.deletion_timestamp.clone();

        assert_ne!(generation_with_deletion(&old), generation_with_deletion(&new));
    }
}
