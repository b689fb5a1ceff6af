//! Property tests for the layout enumerator, the repr-key codec, byte
//! transposition, and schedule merging.

use proptest::prelude::*;

use fluidml::ir::ElemType;
use fluidml::layout::{format_layouts, parse_layouts};
use fluidml::tensor::transpose_bytes;
use fluidml::{permute_shape, Layout, Schedule};

fn factorial(n: usize) -> usize {
    (1..=n).product::<usize>().max(1)
}

fn small_shape() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..=4, 0..=4)
}

proptest! {
    #[test]
    fn permute_shape_counts_free_factorial(shape in small_shape()) {
        let layouts: Vec<Layout> = permute_shape(&shape).collect();
        let free = shape.iter().filter(|&&d| d != 1).count();
        prop_assert_eq!(layouts.len(), factorial(free));
    }

    #[test]
    fn permute_shape_yields_distinct_permutations(shape in small_shape()) {
        let layouts: Vec<Layout> = permute_shape(&shape).collect();
        let distinct: std::collections::HashSet<_> = layouts.iter().cloned().collect();
        prop_assert_eq!(distinct.len(), layouts.len());
        for layout in &layouts {
            let mut sorted = layout.as_slice().to_vec();
            sorted.sort_unstable();
            let identity: Vec<usize> = (0..shape.len()).collect();
            prop_assert_eq!(sorted, identity);
        }
    }

    #[test]
    fn permute_shape_pins_unit_extents(shape in small_shape()) {
        for layout in permute_shape(&shape) {
            for (position, &axis) in layout.as_slice().iter().enumerate() {
                if shape[position] == 1 {
                    prop_assert_eq!(axis, position);
                }
            }
        }
    }

    #[test]
    fn repr_keys_round_trip(shapes in prop::collection::vec(small_shape(), 0..=3)) {
        let layouts: Vec<Layout> = shapes
            .iter()
            .map(|shape| permute_shape(shape).last().unwrap())
            .collect();
        let text = format_layouts(&layouts);
        prop_assert_eq!(parse_layouts(&text).unwrap(), layouts);
    }

    #[test]
    fn transpose_preserves_multiset(shape in prop::collection::vec(1u64..=3, 1..=3)) {
        let elems: usize = shape.iter().product::<u64>() as usize;
        let bytes: Vec<u8> = (0..elems).map(|i| i as u8).collect();
        for layout in permute_shape(&shape) {
            let out = transpose_bytes(&bytes, &shape, ElemType::I8, &layout).unwrap();
            let mut sorted_in = bytes.clone();
            let mut sorted_out = out.clone();
            sorted_in.sort_unstable();
            sorted_out.sort_unstable();
            prop_assert_eq!(&sorted_in, &sorted_out);
            // identity layouts must copy verbatim
            if layout.is_identity() {
                prop_assert_eq!(&out, &bytes);
            }
        }
    }

    #[test]
    fn merge_has_each_key_exactly_once(
        keys in prop::collection::btree_set("%[a-z][a-z0-9]{0,3}", 1..6),
        copies in 1usize..4,
    ) {
        let schedules: Vec<Schedule> = (0..copies)
            .map(|_| {
                let mut schedule = Schedule::new();
                for key in &keys {
                    schedule.insert(key, Layout(vec![0, 1]));
                }
                schedule
            })
            .collect();
        let merged = Schedule::merge(schedules.iter());
        prop_assert_eq!(merged.len(), keys.len());
    }
}
