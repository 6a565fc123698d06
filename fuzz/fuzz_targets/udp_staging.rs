#![no_main]
use std::collections::VecDeque;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rxnet::storage::DatagramBuffer;

#[derive(Arbitrary, Debug)]
enum Op {
    Enqueue(u8, Vec<u8>),
    Append(Vec<u8>),
    Commit(u8),
    Abort,
    Begin,
    Read(u8),
    Drop,
}

fuzz_target!(|ops: Vec<Op>| {
    let mut buffer = DatagramBuffer::new(vec![0u8; 4], vec![0; 8], vec![0; 256]);
    let mut queued: VecDeque<(u8, Vec<u8>)> = VecDeque::new();
    let mut current: VecDeque<u8> = VecDeque::new();
    let mut pending: Vec<u8> = Vec::new();

    for op in ops {
        match op {
            Op::Enqueue(header, data) => {
                if buffer.enqueue_slice(header, &data).is_ok() {
                    queued.push_back((header, data));
                }
            }
            Op::Append(data) => {
                let size = buffer.append(&data);
                pending.extend_from_slice(&data[..size]);
            }
            Op::Commit(header) => {
                let data = std::mem::take(&mut pending);
                if buffer.commit(header).is_ok() {
                    queued.push_back((header, data));
                }
            }
            Op::Abort => {
                buffer.abort();
                pending.clear();
            }
            Op::Begin => match buffer.begin_dequeue() {
                Ok((header, size)) => {
                    let (expected_header, data) = queued.pop_front().unwrap();
                    assert_eq!(header, expected_header);
                    assert_eq!(size, data.len());
                    current = data.into();
                }
                Err(_) => {
                    assert!(queued.is_empty());
                    current.clear();
                }
            },
            Op::Read(len) => {
                let mut data = vec![0; len as usize];
                let size = buffer.dequeue_payload(&mut data);
                let expected: Vec<u8> = current.drain(..size).collect();
                assert_eq!(&data[..size], &expected[..]);
            }
            Op::Drop => {
                current.clear();
                if buffer.drop_front().is_ok() {
                    queued.pop_front().unwrap();
                } else {
                    assert!(queued.is_empty());
                }
            }
        }

        let recorded: usize = queued.iter().map(|(_, data)| data.len()).sum();
        assert_eq!(buffer.packet_count(), queued.len());
        assert_eq!(buffer.remaining(), current.len());
        assert_eq!(buffer.pending_len(), pending.len());
        assert_eq!(
            buffer.payload_bytes_count(),
            recorded + current.len() + pending.len()
        );
    }
});
