use std::fs;

use command::{Opcode, TextSink, Trace, write_trace};
use geometry::{Geometry, Level, Organization};
use pipeline::testutils::{check_drain_order, closed_form_len, random_shapes};
use pipeline::{
    AttentionShape, FinalContextHead, Generated, IterationBuilder, PipelineParams, generate,
};

fn default_geometry() -> Geometry {
    Geometry::new(Organization::default()).unwrap()
}

fn run(shape: AttentionShape, params: PipelineParams) -> Generated {
    generate(&default_geometry(), &shape, &params).unwrap()
}

fn expected_len(generated: &Generated, params: &PipelineParams) -> u64 {
    let valid: Vec<u64> = generated.sets.iter().map(|s| s.valid_channels()).collect();
    closed_form_len(&default_geometry(), &generated.layout, params, &valid)
}

#[test]
fn default_attention_layer() {
    let params = PipelineParams::default();
    let generated = run(AttentionShape::default(), params);

    assert_eq!(generated.sets.len(), 4);
    assert!(generated.sets.iter().all(|s| s.valid_channels() == 16));
    assert_eq!(generated.trace.len(), 43248);
    assert_eq!(generated.trace.len() as u64, expected_len(&generated, &params));
    check_drain_order(&generated.sets, &generated.trace, params.drain_period).unwrap();
}

#[test]
fn corrected_final_stage_keeps_drain_order() {
    let params = PipelineParams {
        final_context_head: FinalContextHead::Second,
        ..PipelineParams::default()
    };
    let generated = run(AttentionShape::default(), params);
    assert_eq!(generated.trace.len(), 43248);
    check_drain_order(&generated.sets, &generated.trace, params.drain_period).unwrap();
}

#[test]
fn odd_wave_count_adds_one_unpaired_wave() {
    let params = PipelineParams::default();

    let paired = run(
        AttentionShape {
            heads_per_device: 32,
            ..AttentionShape::default()
        },
        params,
    );
    let with_tail = run(
        AttentionShape {
            heads_per_device: 48,
            ..AttentionShape::default()
        },
        params,
    );
    assert_eq!(with_tail.sets.len(), 3);
    assert_eq!(with_tail.trace.len(), paired.trace.len() + 10832);
    assert_eq!(
        with_tail.trace.as_slice()[..paired.trace.len()],
        paired.trace.as_slice()[..]
    );

    let tail_only = run(
        AttentionShape {
            heads_per_device: 16,
            ..AttentionShape::default()
        },
        params,
    );
    assert_eq!(tail_only.trace.len(), 10832);
}

#[test]
fn barriers_cover_every_channel() {
    let generated = run(
        AttentionShape {
            heads_per_device: 40,
            ..AttentionShape::default()
        },
        PipelineParams::default(),
    );
    assert_eq!(generated.sets[2].valid_channels(), 8);

    let commands = generated.trace.as_slice();
    let mut i = 0;
    let mut runs = 0;
    while i < commands.len() {
        if commands[i].opcode() != Opcode::Barrier {
            i += 1;
            continue;
        }
        let len = commands[i..]
            .iter()
            .take_while(|c| c.opcode() == Opcode::Barrier)
            .count();
        assert_eq!(len, 16, "barrier run at {i}");
        for (ch, barrier) in commands[i..i + len].iter().enumerate() {
            assert_eq!(barrier.addr().get(), (ch as u64) << 30);
        }
        i += len;
        runs += 1;
    }
    // pair: 1 + 8 + 8 + 2 + 2, unpaired: 1 + 8 + 1 + 2
    assert_eq!(runs, 21 + 12);
}

#[test]
fn identical_inputs_write_identical_files() {
    let dir = tempfile::tempdir().unwrap();
    let shape = AttentionShape {
        heads_per_device: 40,
        seq_len: 1000,
        ..AttentionShape::default()
    };

    let mut contents = Vec::new();
    for name in ["a.trace", "b.trace"] {
        let path = dir.path().join(name);
        let generated = run(shape, PipelineParams::default());
        let mut sink = TextSink::create(&path).unwrap();
        write_trace(&generated.trace, &mut sink).unwrap();
        drop(sink);
        contents.push(fs::read(&path).unwrap());
    }
    assert!(!contents[0].is_empty());
    assert_eq!(contents[0], contents[1]);
}

#[test]
fn literal_final_stage_repeats_the_first_head() {
    let shape = AttentionShape {
        heads_per_device: 32,
        ..AttentionShape::default()
    };
    let literal = run(shape, PipelineParams::default());
    let corrected = run(
        shape,
        PipelineParams {
            final_context_head: FinalContextHead::Second,
            ..PipelineParams::default()
        },
    );
    assert_eq!(literal.trace.len(), corrected.trace.len());

    let occurrences = |trace: &Trace, batch: &[command::Command]| {
        trace.iter().filter(|c| **c == batch[0]).count()
    };
    let first = &literal.sets[0];
    let second = &literal.sets[1];

    // Both context drain batches of a wave drain the same buffers.
    assert_eq!(occurrences(&literal.trace, &first.context_mac()[0]), 2);
    assert_eq!(occurrences(&literal.trace, &first.context_drain()[1]), 4);
    assert_eq!(occurrences(&literal.trace, &second.context_mac()[0]), 0);
    assert_eq!(occurrences(&literal.trace, &second.context_drain()[0]), 0);

    assert_eq!(occurrences(&corrected.trace, &first.context_mac()[0]), 1);
    assert_eq!(occurrences(&corrected.trace, &first.context_drain()[0]), 2);
    assert_eq!(occurrences(&corrected.trace, &second.context_mac()[0]), 1);
    assert_eq!(occurrences(&corrected.trace, &second.context_drain()[1]), 2);
}

#[test]
fn per_wave_phase_counts() {
    let geometry = default_geometry();
    let shape = AttentionShape {
        heads_per_device: 20,
        seq_len: 1000,
        ..AttentionShape::default()
    };
    let builder = IterationBuilder::new(&geometry, &shape, &PipelineParams::default()).unwrap();
    let layout = *builder.layout();
    for set in builder.build_all().unwrap() {
        let valid = set.valid_channels() as usize;
        assert_eq!(
            set.score_broadcast().len(),
            geometry.count(Level::Bank) as usize * layout.k_chunks as usize * valid
        );
        assert_eq!(
            set.score_drain().len(),
            (layout.columns_per_unit as usize).div_ceil(16)
        );
        assert_eq!(set.softmax().len(), valid);
    }
}

#[test]
fn random_shapes_match_closed_form() {
    for params in [
        PipelineParams::default(),
        PipelineParams {
            final_context_head: FinalContextHead::Second,
            drain_period: 5,
            ..PipelineParams::default()
        },
    ] {
        // Three waves of which the last is unpaired and partially occupied.
        let tail = AttentionShape {
            heads_per_device: 40,
            seq_len: 1000,
            ..AttentionShape::default()
        };
        for shape in random_shapes(24).into_iter().chain([tail]) {
            let generated = run(shape, params);
            assert_eq!(
                generated.trace.len() as u64,
                expected_len(&generated, &params),
                "{shape:?}"
            );
            assert_eq!(
                generated.trace.count(Opcode::Softmax) as u64,
                shape.heads_per_device
            );
            if let Err(violation) =
                check_drain_order(&generated.sets, &generated.trace, params.drain_period)
            {
                panic!("{shape:?}: {violation}");
            }
        }
    }
}
