//! End-to-end scenarios against two simulated devices, one client operation at a time.

mod harness;

use harness::{assert_diagonal, diagonal, run_and_wait_with_err, Bench, COLOR, PITCH};
use pretty_assertions::assert_eq;
use udoom_abi::{CmdWriter, CMD_SIZE_BYTES};
use udoom_driver::error::errno;
use udoom_driver::{DriverError, ErrorKind};

#[test]
fn draw_line_into_own_buffer() {
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(0x3000).unwrap();
    let addr = client.map_buffer(&buffer, false).unwrap();

    buffer.write(0x1000, &diagonal(addr, 31)).unwrap();
    client.run(addr + 0x1000, CMD_SIZE_BYTES).unwrap();
    client.wait(0).unwrap();

    assert_diagonal(&buffer, Some(31));
}

#[test]
fn crossdraw_into_another_clients_buffer_faults() {
    const SIZE: u32 = 0x1000;
    let bench = Bench::new();

    let a = bench.open0();
    let a_buf = a.create_buffer(SIZE).unwrap();
    let addr = a.map_buffer(&a_buf, false).unwrap();

    let b = bench.open0();
    let b_buf = b.create_buffer(2 * SIZE).unwrap();
    let addr2 = b.map_buffer(&b_buf, false).unwrap();

    // Aim at the second page of B's buffer; in A's address space nothing lives there.
    let dst = if addr <= addr2 { addr2 + SIZE } else { addr2 };
    a_buf.write(0x800, &diagonal(dst, 31)).unwrap();
    assert_eq!(run_and_wait_with_err(&a, addr + 0x800, CMD_SIZE_BYTES), DriverError::Io);

    let mut page = vec![0u8; SIZE as usize];
    b_buf.read(u64::from(SIZE), &mut page).unwrap();
    assert!(page.iter().all(|&p| p == 0));
    assert!(!b.is_quarantined());

    a.unmap_buffer(addr).unwrap();
    b.unmap_buffer(addr2).unwrap();
}

#[test]
fn crossmap_between_devices_is_refused() {
    let bench = Bench::new();
    let client0 = bench.open0();
    let client1 = bench.open1();
    let buffer = client0.create_buffer(0x3000).unwrap();

    let err = client1.map_buffer(&buffer, false).unwrap_err();
    assert_eq!(err, DriverError::DeviceMismatch);
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert_eq!(err.errno(), errno::EPERM);
    assert!(client1.mappings().is_empty());
    assert!(client1.page_tables().is_empty());
}

#[test]
fn double_mapping_survives_dropping_the_first() {
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(0x3000).unwrap();
    let addr = client.map_buffer(&buffer, false).unwrap();
    let addr2 = client.map_buffer(&buffer, false).unwrap();
    assert_ne!(addr, addr2);

    let view = buffer.clone();
    client.unmap_buffer(addr).unwrap();
    drop(buffer);

    view.write(0x1000, &diagonal(addr2, 31)).unwrap();
    client.run(addr2 + 0x1000, CMD_SIZE_BYTES).unwrap();
    client.wait(0).unwrap();
    assert_diagonal(&view, Some(31));

    client.unmap_buffer(addr2).unwrap();
    assert_eq!(view.ref_count(), 1);
}

#[test]
fn drawing_into_read_only_mapping_faults() {
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(0x3000).unwrap();
    let addr = client.map_buffer(&buffer, true).unwrap();

    buffer.write(0x1000, &diagonal(addr, 31)).unwrap();
    assert_eq!(run_and_wait_with_err(&client, addr + 0x1000, CMD_SIZE_BYTES), DriverError::Io);
    assert_diagonal(&buffer, None);
}

#[test]
fn invalid_opcode_faults() {
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(0x1000).unwrap();
    let addr = client.map_buffer(&buffer, false).unwrap();

    let junk: Vec<u8> = (0..0x10).map(|i| if i % 2 == 1 { 0x13 } else { 0x31 }).collect();
    buffer.write(0, &junk).unwrap();
    assert_eq!(run_and_wait_with_err(&client, addr, 0x10), DriverError::Io);
    assert_eq!(client.run(addr, 0x10), Err(DriverError::Io));
}

#[test]
fn unaligned_size_is_rejected_before_queueing() {
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(0x2000).unwrap();
    let addr = client.map_buffer(&buffer, false).unwrap();
    buffer.write(0x1000, &diagonal(addr, 31)).unwrap();

    let before = bench.devices[0].ring_positions();
    let err = client.run(addr + 0x1000, 13).unwrap_err();
    assert_eq!(err, DriverError::Misaligned { va: addr + 0x1000, size: 13 });
    assert_eq!(err.errno(), errno::EINVAL);
    assert_eq!(bench.devices[0].ring_positions(), before);
    assert_eq!(bench.devices[0].stats().jobs_submitted, 0);
    assert!(!client.is_quarantined());
}

#[test]
fn many_single_page_buffers() {
    const COUNT: usize = 2048;
    let bench = Bench::new();
    let client = bench.open0();

    let mut bufs = Vec::with_capacity(COUNT);
    let mut addrs = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        let buffer = client.create_buffer(0x1000).unwrap();
        addrs.push(client.map_buffer(&buffer, false).unwrap());
        bufs.push(buffer);
    }
    assert_eq!(client.page_tables().len(), 2);

    // One command packet in the first buffer, retargeted before every run.
    let mut cmd = [0u32; 5];
    cmd[0] = udoom_abi::cmd::header(udoom_abi::CmdOpcode::DrawLine, COLOR);
    cmd[2] = PITCH;
    cmd[3] = udoom_abi::cmd::pack_xy(0, 0);
    for i in 1..COUNT {
        let last = 1 + (i % 0x20) as u16;
        cmd[1] = addrs[i];
        cmd[4] = udoom_abi::cmd::pack_xy(last, last);
        let bytes: Vec<u8> = cmd.iter().flat_map(|w| w.to_le_bytes()).collect();
        bufs[0].write(0, &bytes).unwrap();

        client.run(addrs[0], CMD_SIZE_BYTES).unwrap();
        client.wait(0).unwrap();
        assert_diagonal(&bufs[i], Some(u32::from(last)));
    }

    for addr in addrs {
        client.unmap_buffer(addr).unwrap();
    }
    assert!(client.page_tables().is_empty());
}

#[test]
fn close_without_waiting_for_a_long_job() {
    const DIM: u16 = 128;
    const CMDS: u32 = 32;
    let bench = Bench::new();
    let client = bench.open0();

    let surface = client.create_buffer(4 * u32::from(DIM) * u32::from(DIM)).unwrap();
    let addr = client.map_buffer(&surface, false).unwrap();
    let cmds = client.create_buffer(0x8000).unwrap();
    let cmd_addr = client.map_buffer(&cmds, false).unwrap();

    let mut w = CmdWriter::new();
    for _ in 0..CMDS {
        w.fill_rect(COLOR, addr, 2 * u32::from(DIM), 0, 0, DIM, DIM);
    }
    cmds.write(0, &w.finish()).unwrap();
    client.run(cmd_addr, CMD_SIZE_BYTES * CMDS).unwrap();

    // Tear everything down while the job may still be running.
    client.unmap_buffer(addr).unwrap();
    client.unmap_buffer(cmd_addr).unwrap();
    drop(client);

    // The device keeps serving new clients.
    let next = bench.open0();
    let buffer = next.create_buffer(0x2000).unwrap();
    let va = next.map_buffer(&buffer, false).unwrap();
    buffer.write(0x1000, &diagonal(va, 0x3F)).unwrap();
    next.run(va + 0x1000, CMD_SIZE_BYTES).unwrap();
    next.wait(0).unwrap();
    assert_diagonal(&buffer, Some(0x3F));
}

#[test]
fn truncated_packet_faults() {
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(0x3000).unwrap();
    let addr = client.map_buffer(&buffer, false).unwrap();

    buffer.write(0x1000, &diagonal(addr, 31)).unwrap();
    assert_eq!(run_and_wait_with_err(&client, addr + 0x1000, 4), DriverError::Io);
    assert_diagonal(&buffer, None);
}

#[test]
fn drawing_past_the_mapping_faults() {
    const SIZE: u32 = 0x3000;
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(SIZE).unwrap();
    let addr = client.map_buffer(&buffer, false).unwrap();

    buffer.write(0x1000, &diagonal(addr + SIZE, 31)).unwrap();
    assert_eq!(run_and_wait_with_err(&client, addr + 0x1000, CMD_SIZE_BYTES), DriverError::Io);
    assert_eq!(bench.devices[0].stats().faults, 1);
    assert_eq!(bench.devices[1].stats().faults, 0);
}

#[test]
fn cpu_access_to_an_unmapped_buffer() {
    const SIZE: u32 = 0x3000;
    let bench = Bench::new();
    let client = bench.open0();
    let buffer = client.create_buffer(SIZE).unwrap();

    buffer.write(0, &vec![0x13; SIZE as usize]).unwrap();
    let mut back = vec![0u8; SIZE as usize];
    buffer.read(0, &mut back).unwrap();
    assert!(back.iter().all(|&b| b == 0x13));

    let err = buffer.write(u64::from(SIZE) - 1, &[0, 0]).unwrap_err();
    assert_eq!(err.errno(), errno::EFAULT);
}
