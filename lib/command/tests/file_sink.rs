use std::fs;
use std::io::BufReader;

use command::{Command, Opcode, TextSink, Trace, read_trace, write_trace};
use geometry::Address;

fn trace_of(len: u64) -> Trace {
    (0..len)
        .map(|i| Command::new(Opcode::MultiplyAccumulate, Address::new(i * 32)))
        .collect()
}

#[test]
fn file_is_overwritten_on_each_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attacc_bank.trace");

    let mut sink = TextSink::create(&path).unwrap();
    write_trace(&trace_of(100), &mut sink).unwrap();
    drop(sink);
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 100);

    let mut sink = TextSink::create(&path).unwrap();
    write_trace(&trace_of(3), &mut sink).unwrap();
    drop(sink);

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(
        text,
        "PIM_MAC_AB 0x00000000\nPIM_MAC_AB 0x00000020\nPIM_MAC_AB 0x00000040\n"
    );
}

#[test]
fn file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.txt");
    let trace = trace_of(4096);

    let mut sink = TextSink::create(&path).unwrap();
    write_trace(&trace, &mut sink).unwrap();
    drop(sink);

    let file = fs::File::open(&path).unwrap();
    assert_eq!(read_trace(BufReader::new(file)).unwrap(), trace);
}
