// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

// End-to-end tests of the platform against a simulated board.

use std::sync::Arc;
use std::time::Duration;

use fpga::eeprom::DIAG_ADDR;
use fpga::eeprom::PRIMARY_ADDR;
use fpga::engine::PageHalf;
use fpga::engine::PollPolicy;
use fpga::sim::pattern;
use fpga::sim::SimBoard;
use fpga::sim::SimEvent;
use fpga::sim::SimModule;
use fpga::sim::SimVersions;
use fpga::status::QSFP_LPMODE_REG;
use fpga::status::QSFP_PRESENT_REG;
use fpga::status::QSFP_RESET_REG;
use fpga::status::SFP_GPIO_DATA_EN;
use fpga::status::SFP_GPIO_DATA_OUT;
use fpga::FpgaAttr;
use fpga::FpgaError;
use fpga::Platform;
use fpga::PlatformConfig;
use fpga::PortAttr;
use fpga::RegionKind;
use pretty_assertions::assert_eq;
use slog::Drain;

fn logger() -> slog::Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

// Status is re-read on every access so tests see hot-plug immediately.
fn platform(board: &SimBoard) -> Platform {
    let config = PlatformConfig {
        poll: PollPolicy::immediate(),
        status_max_age: Duration::ZERO,
    };
    Platform::new(&logger(), board.region_table(), config).unwrap()
}

// Probe the module in `port` and discard the probe's transactions.
fn probed(board: &SimBoard, platform: &Platform, port: u8) {
    platform.eeprom_layout(port).unwrap();
    board.take_events(port).unwrap();
}

fn read(index: u8, addr: u8, half: PageHalf, page: u8) -> SimEvent {
    SimEvent::Read {
        index,
        addr,
        half,
        page,
    }
}

fn select(index: u8, addr: u8, page: u8) -> SimEvent {
    SimEvent::Write {
        index,
        addr,
        offset: 0x7f,
        value: page,
    }
}

#[test]
fn test_base_page_reads_need_no_page_select() {
    let board = SimBoard::default();
    board.insert(1, SimModule::qsfp(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 1);

    let data = p.eeprom_read(1, 0, 256).unwrap();
    assert_eq!(data.len(), 256);
    assert_eq!(data[0], 0x11);
    assert_eq!(&data[128..], &pattern(PRIMARY_ADDR, 0, PageHalf::Upper)[..]);
    assert_eq!(
        board.take_events(1).unwrap(),
        vec![
            read(0, PRIMARY_ADDR, PageHalf::Lower, 0),
            read(0, PRIMARY_ADDR, PageHalf::Upper, 0),
        ]
    );
}

#[test]
fn test_high_page_selects_once_and_restores() {
    let board = SimBoard::default();
    board.insert(2, SimModule::qsfp(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 2);

    // Slice 5 is page 4.
    let data = p.eeprom_read(2, 5 * 128, 128).unwrap();
    assert_eq!(data, pattern(PRIMARY_ADDR, 4, PageHalf::Upper).to_vec());
    assert_eq!(
        board.take_events(2).unwrap(),
        vec![
            select(1, PRIMARY_ADDR, 4),
            read(1, PRIMARY_ADDR, PageHalf::Upper, 4),
            select(1, PRIMARY_ADDR, 0),
        ]
    );
    assert_eq!(
        board
            .with_module(2, |m| m.selected_page(PRIMARY_ADDR))
            .unwrap()
            .flatten(),
        Some(0)
    );

    // Page 0 reads back unchanged afterwards.
    let upper = p.eeprom_read(2, 128, 128).unwrap();
    assert_eq!(upper, pattern(PRIMARY_ADDR, 0, PageHalf::Upper).to_vec());
}

#[test]
fn test_read_spanning_pages() {
    let board = SimBoard::default();
    board.insert(3, SimModule::qsfp_dd(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 3);

    let data = p.eeprom_read(3, 250, 20).unwrap();
    let mut expected = pattern(PRIMARY_ADDR, 0, PageHalf::Upper)[122..].to_vec();
    expected.extend_from_slice(&pattern(PRIMARY_ADDR, 1, PageHalf::Upper)[..14]);
    assert_eq!(data, expected);
    assert_eq!(
        board.take_events(3).unwrap(),
        vec![
            read(2, PRIMARY_ADDR, PageHalf::Upper, 0),
            select(2, PRIMARY_ADDR, 1),
            read(2, PRIMARY_ADDR, PageHalf::Upper, 1),
            select(2, PRIMARY_ADDR, 0),
        ]
    );
}

#[test]
fn test_reads_clipped_to_device_size() {
    let board = SimBoard::default();
    board.insert(4, SimModule::qsfp(false)).unwrap();
    let p = platform(&board);

    assert_eq!(p.eeprom_size(4).unwrap(), 256);
    assert_eq!(p.eeprom_read(4, 200, 100).unwrap().len(), 56);
    assert!(p.eeprom_read(4, 256, 10).unwrap().is_empty());
    assert!(p.eeprom_read(4, 0, 0).unwrap().is_empty());
}

#[test]
fn test_layout_detection() {
    let board = SimBoard::default();
    board.insert(1, SimModule::qsfp(false)).unwrap();
    board.insert(2, SimModule::qsfp(true)).unwrap();
    board.insert(3, SimModule::qsfp_dd(false)).unwrap();
    board.insert(4, SimModule::qsfp_dd(true)).unwrap();
    board.insert(65, SimModule::sfp(true, true)).unwrap();
    board.insert(66, SimModule::sfp(false, false)).unwrap();
    let p = platform(&board);

    let sizes: Vec<usize> = [1, 2, 3, 4, 65, 66]
        .into_iter()
        .map(|port| p.eeprom_size(port).unwrap())
        .collect();
    assert_eq!(sizes, vec![256, 32896, 256, 32896, 33152, 256]);

    // Empty ports report the unpaged size of their class.
    assert_eq!(p.eeprom_size(5).unwrap(), 256);
}

#[test]
fn test_absent_port_never_reaches_engine() {
    let board = SimBoard::default();
    board.insert(7, SimModule::qsfp(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 7);

    board.remove(7).unwrap();
    let err = p.eeprom_read(7, 0, 128).unwrap_err();
    assert!(matches!(err, FpgaError::NotPresent { port: 7 }));
    assert_eq!(err.errno(), libc::ENODEV);
    let err = p.eeprom_write(7, 0, &[1]).unwrap_err();
    assert!(matches!(err, FpgaError::NotPresent { port: 7 }));
    assert!(board.take_events(7).unwrap().is_empty());
}

#[test]
fn test_swapped_module_is_reprobed() {
    let board = SimBoard::default();
    board.insert(8, SimModule::qsfp(false)).unwrap();
    let p = platform(&board);
    assert_eq!(p.eeprom_size(8).unwrap(), 256);

    board.remove(8).unwrap();
    assert!(!p.port_status(8).unwrap().present);
    board.insert(8, SimModule::qsfp_dd(true)).unwrap();
    assert_eq!(p.eeprom_size(8).unwrap(), 32896);

    // An explicit refresh notices a swap the status poll missed.
    board.remove(8).unwrap();
    board.insert(8, SimModule::qsfp(false)).unwrap();
    assert_eq!(p.refresh_layout(8).unwrap().size, 256);
}

#[test]
fn test_status_cached_within_max_age() {
    let max_age = Duration::from_millis(100);
    let board = SimBoard::default();
    board.insert(5, SimModule::qsfp(true)).unwrap();
    let config = PlatformConfig {
        poll: PollPolicy::immediate(),
        status_max_age: max_age,
    };
    let p = Platform::new(&logger(), board.region_table(), config).unwrap();
    assert_eq!(p.eeprom_layout(5).unwrap().size, 32896);
    let reads = board.udb.reads_of(QSFP_PRESENT_REG);

    // Within the window the snapshot answers without touching hardware.
    board.remove(5).unwrap();
    assert_eq!(p.attr_read(5, PortAttr::Present).unwrap(), "1\n");
    assert!(p.port_status(5).unwrap().present);
    assert_eq!(board.udb.reads_of(QSFP_PRESENT_REG), reads);

    std::thread::sleep(max_age * 2);
    assert_eq!(p.attr_read(5, PortAttr::Present).unwrap(), "0\n");
    assert_eq!(board.udb.reads_of(QSFP_PRESENT_REG), reads + 1);
    assert!(matches!(
        p.eeprom_read(5, 0, 1).unwrap_err(),
        FpgaError::NotPresent { port: 5 }
    ));

    // Seeing the port empty dropped its layout, so the next module is
    // probed rather than inheriting the old one.
    board.insert(5, SimModule::qsfp(false)).unwrap();
    std::thread::sleep(max_age * 2);
    board.take_events(5).unwrap();
    assert_eq!(p.eeprom_layout(5).unwrap().size, 256);
    assert_eq!(
        board.take_events(5).unwrap(),
        vec![read(4, PRIMARY_ADDR, PageHalf::Lower, 0)]
    );
}

#[test]
fn test_no_such_port() {
    let board = SimBoard::default();
    let p = platform(&board);
    for port in [0, 67] {
        let err = p.eeprom_read(port, 0, 1).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(p.attr_read(port, PortAttr::Present).is_err());
    }
}

#[test]
fn test_dual_address_mapping() {
    let board = SimBoard::default();
    board.insert(65, SimModule::sfp(true, true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 65);

    let data = p.eeprom_read(65, 256, 128).unwrap();
    assert_eq!(data, pattern(DIAG_ADDR, 0, PageHalf::Lower).to_vec());
    assert_eq!(
        board.take_events(65).unwrap(),
        vec![read(32, DIAG_ADDR, PageHalf::Lower, 0)]
    );

    // Page 0 of the diagnostic device is selected explicitly, but leaves
    // nothing to restore.
    let data = p.eeprom_read(65, 384, 128).unwrap();
    assert_eq!(data, pattern(DIAG_ADDR, 0, PageHalf::Upper).to_vec());
    assert_eq!(
        board.take_events(65).unwrap(),
        vec![
            select(32, DIAG_ADDR, 0),
            read(32, DIAG_ADDR, PageHalf::Upper, 0),
        ]
    );

    let data = p.eeprom_read(65, 512, 128).unwrap();
    assert_eq!(data, pattern(DIAG_ADDR, 1, PageHalf::Upper).to_vec());
    assert_eq!(
        board.take_events(65).unwrap(),
        vec![
            select(32, DIAG_ADDR, 1),
            read(32, DIAG_ADDR, PageHalf::Upper, 1),
            select(32, DIAG_ADDR, 0),
        ]
    );
}

#[test]
fn test_unpaged_diag_device() {
    let board = SimBoard::default();
    board.insert(66, SimModule::sfp(true, false)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 66);

    assert_eq!(p.eeprom_size(66).unwrap(), 512);
    let data = p.eeprom_read(66, 0, 1024).unwrap();
    assert_eq!(data.len(), 512);
    assert_eq!(&data[384..], &pattern(DIAG_ADDR, 0, PageHalf::Upper)[..]);
    let events = board.take_events(66).unwrap();
    assert_eq!(events.iter().filter(|e| e.is_page_select()).count(), 1);
}

#[test]
fn test_partial_read_on_failure() {
    let board = SimBoard::default();
    board.insert(9, SimModule::qsfp(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 9);

    // Both base halves succeed, then the page select for slice 2 fails.
    board.udb.fail_after(Some(2));
    let data = p.eeprom_read(9, 0, 384).unwrap();
    assert_eq!(data.len(), 256);

    board.udb.fail_after(Some(0));
    let err = p.eeprom_read(9, 0, 10).unwrap_err();
    assert!(matches!(err, FpgaError::Busy { port: 9, status: 2 }));
    assert_eq!(err.errno(), libc::EBUSY);
}

#[test]
fn test_failed_page_restore() {
    let board = SimBoard::default();
    board.insert(10, SimModule::qsfp(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 10);

    board.udb.fail_after(Some(2));
    let err = p.eeprom_read(10, 256, 128).unwrap_err();
    assert!(matches!(err, FpgaError::PageRestore { port: 10 }));
    assert_eq!(err.errno(), libc::EBUSY);
}

#[test]
fn test_stalled_engine_times_out() {
    let board = SimBoard::default();
    board.insert(40, SimModule::qsfp(true)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 40);

    board.ldb.set_stalled(true);
    let err = p.eeprom_read(40, 0, 128).unwrap_err();
    assert!(matches!(err, FpgaError::Timeout { port: 40, .. }));
    assert_eq!(err.errno(), libc::ETIMEDOUT);

    board.ldb.set_stalled(false);
    assert_eq!(p.eeprom_read(40, 0, 128).unwrap().len(), 128);
}

#[test]
fn test_eeprom_writes() {
    let board = SimBoard::default();
    board.insert(1, SimModule::qsfp(false)).unwrap();
    let p = platform(&board);
    probed(&board, &p, 1);

    assert_eq!(p.eeprom_write(1, 10, &[0x5a]).unwrap(), 1);
    assert_eq!(
        board.take_events(1).unwrap(),
        vec![SimEvent::Write {
            index: 0,
            addr: PRIMARY_ADDR,
            offset: 10,
            value: 0x5a,
        }]
    );
    assert_eq!(p.eeprom_read(1, 10, 1).unwrap(), vec![0x5a]);
    board.take_events(1).unwrap();

    // Anything but a single byte is consumed without touching the module,
    // even on an empty port.
    assert_eq!(p.eeprom_write(1, 0, &[1, 2, 3]).unwrap(), 3);
    assert_eq!(p.eeprom_write(1, 0, &[]).unwrap(), 0);
    assert_eq!(p.eeprom_write(2, 0, &[1, 2]).unwrap(), 2);
    assert!(board.take_events(1).unwrap().is_empty());

    let err = p.eeprom_write(1, 300, &[0]).unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);

    // The controller's completion status is passed back untouched.
    board.udb.force_status(Some(0x6));
    let err = p.eeprom_write(1, 10, &[0]).unwrap_err();
    assert!(matches!(err, FpgaError::Busy { port: 1, status: 0x6 }));
    board.udb.force_status(None);
    assert_eq!(p.eeprom_write(1, 10, &[0]).unwrap(), 1);
}

#[test]
fn test_absent_defaults() {
    let board = SimBoard::default();
    board.udb.set_reg(QSFP_LPMODE_REG, u32::MAX);
    let p = platform(&board);

    assert_eq!(p.attr_read(1, PortAttr::Present).unwrap(), "0\n");
    assert_eq!(p.attr_read(1, PortAttr::LpMode).unwrap(), "0\n");
    assert_eq!(p.attr_read(1, PortAttr::Reset).unwrap(), "0\n");
    assert_eq!(p.attr_read(65, PortAttr::Present).unwrap(), "0\n");
    assert_eq!(p.attr_read(65, PortAttr::TxDisable).unwrap(), "0\n");
    assert_eq!(p.attr_read(65, PortAttr::TxFault).unwrap(), "1\n");
    assert_eq!(p.attr_read(65, PortAttr::RxLos).unwrap(), "1\n");

    board.insert(1, SimModule::qsfp(false)).unwrap();
    assert_eq!(p.attr_read(1, PortAttr::Present).unwrap(), "1\n");
    assert_eq!(p.attr_read(1, PortAttr::LpMode).unwrap(), "1\n");

    let status = p.all_port_status().unwrap();
    assert_eq!(status.len(), 66);
    assert_eq!(status.iter().filter(|s| s.present).count(), 1);
}

#[test]
fn test_attributes_follow_port_class() {
    let board = SimBoard::default();
    let p = platform(&board);

    assert_eq!(p.attr_read(1, PortAttr::Name).unwrap(), "optoe1\n");
    assert_eq!(p.attr_read(65, PortAttr::Name).unwrap(), "optoe2\n");
    assert_eq!(p.attr_read(12, PortAttr::PortName).unwrap(), "port12\n");
    for (port, attr) in [
        (1, PortAttr::TxFault),
        (1, PortAttr::RxLos),
        (1, PortAttr::TxDisable),
        (66, PortAttr::LpMode),
        (66, PortAttr::Reset),
    ] {
        let err = p.attr_read(port, attr).unwrap_err();
        assert!(matches!(err, FpgaError::InvalidAttribute(_)));
    }
}

#[test]
fn test_control_writes() {
    let board = SimBoard::default();
    board.insert(1, SimModule::qsfp(false)).unwrap();
    board.insert(40, SimModule::qsfp(false)).unwrap();
    board.insert(65, SimModule::sfp(false, false)).unwrap();
    let p = platform(&board);

    // The reset bit is active low.
    p.attr_write(1, PortAttr::Reset, "1").unwrap();
    assert_eq!(board.udb.reg(QSFP_RESET_REG), !1);
    assert_eq!(p.attr_read(1, PortAttr::Reset).unwrap(), "1\n");
    p.attr_write(1, PortAttr::Reset, "0\n").unwrap();
    assert_eq!(board.udb.reg(QSFP_RESET_REG), u32::MAX);

    // Port 40 is bit 7 of the LDB's word, and only that bit changes.
    p.attr_write(40, PortAttr::LpMode, "0x1").unwrap();
    assert_eq!(board.ldb.reg(QSFP_LPMODE_REG), 1 << 7);
    assert_eq!(board.udb.reg(QSFP_LPMODE_REG), 0);
    assert_eq!(p.attr_read(40, PortAttr::LpMode).unwrap(), "1\n");

    p.attr_write(65, PortAttr::TxDisable, "a").unwrap();
    assert_eq!(board.ldb.reg(SFP_GPIO_DATA_OUT), 1 << 11);
    assert_eq!(p.attr_read(65, PortAttr::TxDisable).unwrap(), "1\n");

    let err = p.attr_write(1, PortAttr::Present, "1").unwrap_err();
    assert_eq!(err.errno(), libc::EPERM);
    let err = p.attr_write(1, PortAttr::LpMode, "zz").unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    let err = p.attr_write(65, PortAttr::LpMode, "1").unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
}

#[test]
fn test_dev_class_is_decimal() {
    let board = SimBoard::default();
    let p = platform(&board);

    assert_eq!(p.attr_read(1, PortAttr::DevClass).unwrap(), "1\n");
    assert_eq!(p.attr_read(65, PortAttr::DevClass).unwrap(), "2\n");
    p.attr_write(1, PortAttr::DevClass, "10\n").unwrap();
    assert_eq!(p.attr_read(1, PortAttr::DevClass).unwrap(), "10\n");
    assert_eq!(p.attr_read(2, PortAttr::DevClass).unwrap(), "1\n");
    assert!(p.attr_write(1, PortAttr::DevClass, "0x3").is_err());
}

#[test]
fn test_versions() {
    let board = SimBoard::default();
    let p = platform(&board);
    assert_eq!(p.fpga_attr_read(FpgaAttr::UdbVersion).unwrap(), "2.3\n");
    assert_eq!(p.fpga_attr_read(FpgaAttr::SmbVersion).unwrap(), "1.1\n");
    assert_eq!(p.versions().unwrap().len(), 3);

    // Bit 15 of the version register is not part of the major number.
    let board = SimBoard::new(&SimVersions {
        udb: 0x8305,
        ldb: 0x0203,
        smb: None,
    });
    let p = platform(&board);
    assert_eq!(p.fpga_attr_read(FpgaAttr::UdbVersion).unwrap(), "3.5\n");
    let err = p.fpga_attr_read(FpgaAttr::SmbVersion).unwrap_err();
    assert!(matches!(err, FpgaError::RegionMissing(RegionKind::Smb)));
    assert_eq!(p.versions().unwrap().len(), 2);
}

#[test]
fn test_init_hardware() {
    let board = SimBoard::default();
    board.udb.set_reg(0x4b8, u32::MAX);
    let p = platform(&board);
    p.init_hardware().unwrap();

    assert_eq!(board.ldb.reg(SFP_GPIO_DATA_EN), 0x707);
    for fpga in [&board.udb, &board.ldb] {
        for cpld in [0x400, 0x500] {
            assert_eq!(fpga.reg(cpld + 0xb0) & 0xffff, 0xffff);
            assert_eq!(fpga.reg(cpld + 0xb8) & 0xffff, 0);
        }
    }
    assert_eq!((board.ldb.reg(0x4bc) >> 8) & 0xff, 0x3);
}

#[test]
fn test_concurrent_ports() {
    let board = SimBoard::default();
    for port in [1, 33, 65] {
        let module = if port == 65 {
            SimModule::sfp(true, true)
        } else {
            SimModule::qsfp(true)
        };
        board.insert(port, module).unwrap();
    }
    let p = Arc::new(platform(&board));

    let handles: Vec<_> = [1u8, 33, 65]
        .into_iter()
        .map(|port| {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                for _ in 0..20 {
                    let data = p.eeprom_read(port, 3 * 128, 128).unwrap();
                    let addr = if port == 65 { DIAG_ADDR } else { PRIMARY_ADDR };
                    let page = if port == 65 { 0 } else { 2 };
                    assert_eq!(data, pattern(addr, page, PageHalf::Upper));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
