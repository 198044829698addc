use machine_learning::arch::{Sequential, layers::Layer};

/// The amount of classes the network scores.
pub const NUM_CLASSES: usize = 10;

/// Builds the MNIST convolutional network.
///
/// Takes `(n, 1, 28, 28)` normalized images and returns `(n, 10)` log-probabilities.
pub fn net() -> Sequential {
    Sequential::from_named([
        ("conv1", Layer::conv2d(1, 32, 3, 1)),
        ("relu1", Layer::relu()),
        ("conv2", Layer::conv2d(32, 64, 3, 1)),
        ("relu2", Layer::relu()),
        ("max_pool", Layer::max_pool2d(2)),
        ("dropout1", Layer::dropout2d(0.25)),
        ("flatten", Layer::flatten()),
        ("fc1", Layer::dense((9216, 128))),
        ("relu3", Layer::relu()),
        ("dropout2", Layer::dropout(0.5)),
        ("fc2", Layer::dense((128, NUM_CLASSES))),
        ("log_softmax", Layer::log_softmax()),
    ])
}

#[cfg(test)]
mod tests {
    use machine_learning::arch::Model;

    use super::*;

    #[test]
    fn parameter_layout_matches_the_architecture() {
        let net = net();
        assert_eq!(net.size(), 1_199_882);

        let names: Vec<_> = net.param_layout().into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            [
                "conv1.weight",
                "conv1.bias",
                "conv2.weight",
                "conv2.bias",
                "fc1.weight",
                "fc1.bias",
                "fc2.weight",
                "fc2.bias"
            ]
        );
    }
}
