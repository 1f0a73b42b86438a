//! End-to-end scenarios driving the registry, chain, and effect path
//! through the public API with in-process mock plugin descriptors,
//! without a compiled `.so` fixture or a running audio server.

use std::path::Path;

use effectd::chain::Chain;
use effectd::plugin::abi::RawDefaultHint;
use effectd::plugin::registry::mock::{MockDescriptorBuilder, MockSource};
use effectd::plugin::PluginRegistry;

fn registry_with(descriptors: Vec<*const effectd::plugin::abi::RawPluginDescriptor>) -> &'static PluginRegistry {
    let mut registry = PluginRegistry::with_source(Box::new(MockSource { descriptors }));
    registry.load(Path::new("mock.so")).unwrap();
    Box::leak(Box::new(registry))
}

fn run_chain(chain: &mut Chain, input: &[f32], in_port: &str, out_port: &str) -> Vec<f32> {
    let n = input.len();
    let mut in_buf = input.to_vec();
    let mut out_buf = vec![0.0f32; n];
    chain.activate().unwrap();
    chain.run(n as u64, |name| {
        if name == in_port {
            in_buf.as_mut_ptr()
        } else if name == out_port {
            out_buf.as_mut_ptr()
        } else {
            std::ptr::null_mut()
        }
    });
    out_buf
}

#[test]
fn identity_chain_passes_samples_through_unchanged() {
    let identity = MockDescriptorBuilder::new("Identity", 1)
        .audio_input("Input")
        .audio_output("Output")
        .build();
    let registry = registry_with(vec![identity]);

    let mut chain = Chain::new("c1", 64);
    chain.add_effect("e", "Identity", registry, 48_000).unwrap();
    chain.add_route("e.Input", "c1_in_1").unwrap();
    chain.add_route("e.Output", "c1_out_1").unwrap();

    let out = run_chain(&mut chain, &[1.0, 2.0, 3.0, 4.0], "c1_in_1", "c1_out_1");
    assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn gain_effect_scales_input_by_control_value() {
    let amp = MockDescriptorBuilder::new("Amp", 2)
        .audio_input("Input")
        .audio_output("Output")
        .control_input("Gain", 0.0, 4.0, RawDefaultHint::One)
        .build();
    let registry = registry_with(vec![amp]);

    let mut chain = Chain::new("c1", 64);
    chain.add_effect("e", "Amp", registry, 48_000).unwrap();
    chain.get_effect("e").unwrap().set_control("Gain", 2.0).unwrap();
    chain.add_route("e.Input", "c1_in_1").unwrap();
    chain.add_route("e.Output", "c1_out_1").unwrap();

    let out = run_chain(&mut chain, &[0.1, -0.1], "c1_in_1", "c1_out_1");
    assert!((out[0] - 0.2).abs() < 1e-6);
    assert!((out[1] - -0.2).abs() < 1e-6);
}

#[test]
fn two_amp_effects_in_series_multiply_gains() {
    let amp = MockDescriptorBuilder::new("Amp", 3)
        .audio_input("Input")
        .audio_output("Output")
        .control_input("Gain", 0.0, 10.0, RawDefaultHint::One)
        .build();
    // A distinct descriptor id/name is required per registered plugin
    // type, but both stages use the same underlying plugin type.
    let amp2 = MockDescriptorBuilder::new("AmpStage2", 4)
        .audio_input("Input")
        .audio_output("Output")
        .control_input("Gain", 0.0, 10.0, RawDefaultHint::One)
        .build();
    let registry = registry_with(vec![amp, amp2]);

    let mut chain = Chain::new("c1", 64);
    chain.add_effect("stage1", "Amp", registry, 48_000).unwrap();
    chain.add_effect("stage2", "AmpStage2", registry, 48_000).unwrap();
    chain.get_effect("stage1").unwrap().set_control("Gain", 2.0).unwrap();
    chain.get_effect("stage2").unwrap().set_control("Gain", 3.0).unwrap();
    chain
        .add_wire("stage1.Output", &["stage2.Input".to_string()])
        .unwrap();
    chain.add_route("stage1.Input", "c1_in_1").unwrap();
    chain.add_route("stage2.Output", "c1_out_1").unwrap();

    let out = run_chain(&mut chain, &[1.0, 2.0], "c1_in_1", "c1_out_1");
    assert!((out[0] - 6.0).abs() < 1e-5);
    assert!((out[1] - 12.0).abs() < 1e-5);
}

#[test]
fn fan_out_delivers_identical_samples_to_both_destinations() {
    let identity = MockDescriptorBuilder::new("Identity", 5)
        .audio_input("Input")
        .audio_output("Output")
        .build();
    let registry = registry_with(vec![identity]);

    let mut chain = Chain::new("c1", 64);
    chain.add_effect("src", "Identity", registry, 48_000).unwrap();
    chain.add_effect("d1", "Identity", registry, 48_000).unwrap();
    chain.add_effect("d2", "Identity", registry, 48_000).unwrap();
    chain
        .add_wire("src.Output", &["d1.Input".to_string(), "d2.Input".to_string()])
        .unwrap();
    chain.add_route("src.Input", "c1_in_1").unwrap();
    chain.add_route("d1.Output", "c1_out_1").unwrap();
    chain.add_route("d2.Output", "c1_out_2").unwrap();

    let n = 4;
    let mut in_buf = vec![1.0, 2.0, 3.0, 4.0];
    let mut out1 = vec![0.0f32; n];
    let mut out2 = vec![0.0f32; n];
    chain.activate().unwrap();
    chain.run(n as u64, |name| match name {
        "c1_in_1" => in_buf.as_mut_ptr(),
        "c1_out_1" => out1.as_mut_ptr(),
        "c1_out_2" => out2.as_mut_ptr(),
        _ => std::ptr::null_mut(),
    });
    assert_eq!(out1, out2);
    assert_eq!(out1, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn default_middle_hint_initializes_control_between_bounds() {
    let amp = MockDescriptorBuilder::new("AmpDefault", 6)
        .audio_input("Input")
        .audio_output("Output")
        .control_input("Gain", 0.0, 2.0, RawDefaultHint::Middle)
        .build();
    let registry = registry_with(vec![amp]);

    let mut chain = Chain::new("c1", 64);
    chain.add_effect("e", "AmpDefault", registry, 48_000).unwrap();
    assert_eq!(chain.get_effect("e").unwrap().get_control("Gain").unwrap(), 1.0);
}
