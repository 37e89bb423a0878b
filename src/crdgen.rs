use controller::api::v1alpha1::Pattern;
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&Pattern::crd()).unwrap())
}
