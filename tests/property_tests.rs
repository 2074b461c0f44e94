#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;
    use conv_qnet::{
        dueling_combine, Architecture, ComputeTarget, DeepConvQNetwork, DuelingDeepConvQNetwork,
        NetworkConfigBuilder,
    };
    use ndarray::{Array2, Array4};

    // Strategy for generating (batch, channels, height, width, actions) that clear the trunk
    fn shape_strategy() -> impl Strategy<Value = (usize, usize, usize, usize, usize)> {
        (1usize..=3, 1usize..=3, 36usize..=48, 36usize..=48, 1usize..=8)
    }

    // Strategy for generating an advantage tensor and matching value column
    fn streams_strategy() -> impl Strategy<Value = (Array2<f32>, Array2<f32>)> {
        (1usize..=6, 1usize..=8).prop_flat_map(|(batch, actions)| {
            (
                prop::collection::vec(-10.0f32..10.0, batch),
                prop::collection::vec(-10.0f32..10.0, batch * actions),
            )
                .prop_map(move |(v, a)| {
                    (
                        Array2::from_shape_vec((batch, 1), v).unwrap(),
                        Array2::from_shape_vec((batch, actions), a).unwrap(),
                    )
                })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn test_standard_output_shape((b, c, h, w, n) in shape_strategy()) {
            let config = NetworkConfigBuilder::new()
                .input_dim(&[c, h, w])
                .output_dim(n)
                .compute_target(ComputeTarget::Cpu)
                .build()
                .unwrap();
            let network = DeepConvQNetwork::from_config(&config).unwrap();
            let q = network.forward(Array4::zeros((b, c, h, w)).view()).unwrap();
            prop_assert_eq!(q.dim(), (b, n));
        }

        #[test]
        fn test_dueling_output_shape((b, c, h, w, n) in shape_strategy()) {
            let config = NetworkConfigBuilder::new()
                .architecture(Architecture::Dueling)
                .input_dim(&[c, h, w])
                .output_dim(n)
                .compute_target(ComputeTarget::Cpu)
                .build()
                .unwrap();
            let network = DuelingDeepConvQNetwork::from_config(&config).unwrap();
            let q = network.forward(Array4::zeros((b, c, h, w)).view()).unwrap();
            prop_assert_eq!(q.dim(), (b, n));
        }
    }

    proptest! {
        #[test]
        fn test_dueling_combination_law((values, advantages) in streams_strategy()) {
            let q = dueling_combine(values.view(), advantages.view()).unwrap();
            let mean = advantages.sum() / advantages.len() as f32;

            for ((b, a), &q_ba) in q.indexed_iter() {
                let expected = values[[b, 0]] + (advantages[[b, a]] - mean);
                prop_assert!((q_ba - expected).abs() <= 1e-4, "q[{}, {}] = {}, expected {}", b, a, q_ba, expected);
            }
        }

        #[test]
        fn test_centered_advantages_sum_to_zero((values, advantages) in streams_strategy()) {
            let zeros = Array2::zeros(values.dim());
            let q = dueling_combine(zeros.view(), advantages.view()).unwrap();
            prop_assert!(q.sum().abs() <= 1e-3 * q.len() as f32);
        }
    }
}
