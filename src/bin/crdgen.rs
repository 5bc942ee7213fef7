//! Print the PostgresCluster CRD as YAML

use kube::CustomResourceExt;
use postgres_storage_operator::PostgresCluster;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&PostgresCluster::crd())?);
    Ok(())
}
