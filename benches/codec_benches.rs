use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use enip_cip::cip::{message_router, unconnected_send, DataType, EPath};
use enip_cip::encapsulation::{self, header};
use enip_cip::{StructValue, Tag, TagGroup, TagValue, TemplateDefinition, TemplateRegistry};
use std::sync::Arc;

fn motor_registry() -> (TemplateRegistry, Arc<enip_cip::Template>) {
    let mut registry = TemplateRegistry::new();
    let motor = registry
        .register(
            TemplateDefinition::new("Motor")
                .member("running", DataType::BOOL)
                .member("faulted", DataType::BOOL)
                .member("speed", DataType::REAL)
                .array("history", DataType::DINT, 16),
        )
        .unwrap();
    (registry, motor)
}

fn motor_value() -> TagValue {
    StructValue::new()
        .with("running", true)
        .with("faulted", false)
        .with("speed", 1450.5f32)
        .with("history", TagValue::Array((0..16).map(TagValue::Dint).collect()))
        .into()
}

fn bench_template_codec(c: &mut Criterion) {
    let (_registry, motor) = motor_registry();
    let value = motor_value();
    let bytes = motor.serialize_to_vec(&value).unwrap();

    c.bench_function("struct_serialize", |b| {
        b.iter(|| motor.serialize_to_vec(black_box(&value)).unwrap())
    });
    c.bench_function("struct_deserialize", |b| {
        b.iter(|| motor.deserialize(black_box(&bytes), 0).unwrap())
    });
}

fn bench_requests(c: &mut Criterion) {
    let tag = Tag::new("Program:MainProgram.conveyor[3].speed").unwrap();
    let route = EPath::new().port(1, 0u8).unwrap();

    c.bench_function("tag_name_compile", |b| {
        b.iter(|| Tag::new(black_box("Program:MainProgram.conveyor[3].speed")).unwrap())
    });
    c.bench_function("read_request_wrapped", |b| {
        b.iter(|| {
            let request = tag.generate_read_message_request(None);
            let cip = unconnected_send::build(&request, route.as_bytes(), 2000).unwrap();
            encapsulation::send_rr_data(0x1A2B, black_box(&cip), 10).unwrap()
        })
    });
}

fn bench_group_batching(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_read_batching");
    for count in [10usize, 100, 500] {
        let mut tags = TagGroup::new();
        for i in 0..count {
            tags.add(Arc::new(Tag::new(format!("line_{i}.counter")).unwrap()));
        }
        group.bench_with_input(BenchmarkId::from_parameter(count), &tags, |b, tags| {
            b.iter(|| tags.generate_read_message_requests())
        });
    }
    group.finish();
}

fn bench_reply_parsing(c: &mut Criterion) {
    let replies: Vec<Vec<u8>> = (0..50)
        .map(|i: i32| {
            let mut reply = vec![0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00];
            reply.extend_from_slice(&i.to_le_bytes());
            reply
        })
        .collect();
    let body = message_router::build_multiple_service_packet(&replies);
    let frame = header::build(encapsulation::Command::SendRRData, 0x1A2B, &body).unwrap();

    c.bench_function("frame_parse", |b| {
        b.iter(|| header::parse(black_box(&frame)).unwrap())
    });
    c.bench_function("multiple_service_reply_split", |b| {
        b.iter(|| message_router::parse_multiple_service_reply(black_box(&body)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_template_codec,
    bench_requests,
    bench_group_batching,
    bench_reply_parsing
);
criterion_main!(benches);
