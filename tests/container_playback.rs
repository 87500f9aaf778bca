//! Container backend driven through the synthetic codec library.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use mixmusic::container::{ContainerBackend, ContainerMusic};
use mixmusic::error::{clear_error, get_error, MusicError};
use mixmusic::music::{
    AudioFormat, MetaTag, Music, MusicBackend, MusicSource, OutputSpec, SampleFormat,
};
use rstest::rstest;
use serial_test::serial;

const RATE: u32 = 8000;

fn spec() -> OutputSpec {
    OutputSpec::new(AudioFormat::S16, 2, RATE)
}

fn backend() -> (ContainerBackend, std::sync::Arc<SyntStats>) {
    let (loader, stats) = synt_loader();
    (ContainerBackend::new(loader, spec()), stats)
}

fn open(backend: &ContainerBackend, file: &SyntFile) -> ContainerMusic {
    backend
        .open(MusicSource::from_bytes(file.build()))
        .expect("synthetic file opens")
}

fn frames(data: &[u8]) -> Vec<(i16, i16)> {
    data.chunks_exact(4)
        .map(|c| {
            (
                i16::from_ne_bytes([c[0], c[1]]),
                i16::from_ne_bytes([c[2], c[3]]),
            )
        })
        .collect()
}

/// Pull until done, with a safety limit
fn drain(music: &mut dyn Music, chunk: usize) -> (usize, bool) {
    let mut buf = vec![0u8; chunk];
    let mut total = 0;
    for _ in 0..10_000 {
        let pulled = music.play_audio(&mut buf).unwrap();
        total += pulled.bytes;
        if pulled.done {
            return (total, true);
        }
    }
    (total, false)
}

#[rstest]
#[case(SampleFormat::U8)]
#[case(SampleFormat::S16)]
#[case(SampleFormat::S32)]
#[case(SampleFormat::F32)]
#[case(SampleFormat::U8P)]
#[case(SampleFormat::S16P)]
#[case(SampleFormat::S32P)]
#[case(SampleFormat::F32P)]
fn test_decodes_every_mappable_format(#[case] format: SampleFormat) {
    let (backend, _stats) = backend();
    let file = SyntFile::new(format, RATE, 2).audio_packets(4, 256);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();

    let mut buf = vec![0u8; 8192];
    let pulled = music.play_audio(&mut buf).unwrap();
    assert_eq!(pulled.bytes, 1024 * 4);
    assert!(pulled.done);

    for (left, right) in frames(&buf[..pulled.bytes]) {
        assert!((left as i32 - 8192).abs() <= 2, "left {} for {}", left, format);
        assert!((right as i32 - 16384).abs() <= 2, "right {} for {}", right, format);
    }
}

#[test]
fn test_play_once_then_done() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(4, 256);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();
    assert!(music.is_playing());

    let mut buf = vec![0u8; 4096];
    let pulled = music.play_audio(&mut buf).unwrap();
    assert_eq!(pulled.bytes, 4096);
    assert!(!pulled.done);

    let pulled = music.play_audio(&mut buf).unwrap();
    assert_eq!(pulled.bytes, 0);
    assert!(pulled.done);
    assert!(!music.is_playing());
}

#[test]
fn test_loop_count_repeats_track() {
    let (backend, stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(4, 256);
    let mut music = open(&backend, &file);
    music.play(3).unwrap();

    let (total, done) = drain(&mut music, 1000);
    assert!(done);
    assert_eq!(total, 3 * 4096);
    // initial play plus two rewinds
    assert_eq!(stats.seeks.load(Ordering::SeqCst), 3);
}

#[rstest]
#[case(1, 2823)]
#[case(3, 8468)]
fn test_resampled_loops_are_seamless(#[case] loops: i32, #[case] expected: usize) {
    let (loader, stats) = synt_loader();
    let backend = ContainerBackend::new(loader, OutputSpec::new(AudioFormat::S16, 2, 22050));
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(4, 256);
    let mut music = open(&backend, &file);
    music.play(loops).unwrap();

    // ceil(loops * 1024 * 22050 / 8000): no frame lost or added at a seam
    let (total, done) = drain(&mut music, 1000);
    assert!(done);
    assert_eq!(total / 4, expected);
    assert_eq!(stats.seeks.load(Ordering::SeqCst), loops as usize);
}

#[test]
fn test_infinite_loop_never_finishes() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::F32P, RATE, 2).audio_packets(4, 256);
    let mut music = open(&backend, &file);
    music.play(-1).unwrap();

    let mut buf = vec![0u8; 4096];
    for _ in 0..12 {
        let pulled = music.play_audio(&mut buf).unwrap();
        assert_eq!(pulled.bytes, 4096);
        assert!(!pulled.done);
    }
    assert!(music.is_playing());
}

#[test]
fn test_stop_finishes_after_queue() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(4, 256);
    let mut music = open(&backend, &file);

    let mut buf = vec![0u8; 64];
    let pulled = music.play_audio(&mut buf).unwrap();
    assert_eq!((pulled.bytes, pulled.done), (0, true));

    music.play(1).unwrap();
    music.play_audio(&mut buf).unwrap();
    music.stop();
    // the rest of the decoded packet is still delivered
    let (total, done) = drain(&mut music, 4096);
    assert!(done);
    assert_eq!(total, 256 * 4 - 64);
}

#[test]
fn test_tell_follows_packets() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(4, 800);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();
    assert_eq!(music.tell(), Some(0.0));

    let mut buf = vec![0u8; 800 * 4];
    for expected in [0.0, 0.1, 0.2] {
        music.play_audio(&mut buf).unwrap();
        let position = music.tell().unwrap();
        assert!((position - expected).abs() < 1e-9, "{} != {}", position, expected);
    }
}

#[test]
fn test_packet_without_timestamp_is_unknown_position() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).packet(SyntPacket {
        stream: 0,
        pts: NO_PTS,
        format: format_code(SampleFormat::S16),
        rate: RATE,
        channels: 2,
        samples: 10,
        data: sample_data(SampleFormat::S16, 2, 10),
    });
    let mut music = open(&backend, &file);
    music.play(1).unwrap();
    let mut buf = vec![0u8; 40];
    music.play_audio(&mut buf).unwrap();
    assert_eq!(music.tell(), None);
}

#[test]
fn test_seek_jumps_and_discards_queue() {
    let (backend, stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(8, 1000);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();

    let mut buf = vec![0u8; 100];
    music.play_audio(&mut buf).unwrap();
    let flushes = stats.flushes.load(Ordering::SeqCst);

    music.seek(0.5).unwrap();
    assert_eq!(stats.last_seek.load(Ordering::SeqCst), 4000);
    assert_eq!(music.tell(), Some(0.5));
    assert_eq!(stats.flushes.load(Ordering::SeqCst), flushes + 1);

    let (total, done) = drain(&mut music, 4096);
    assert!(done);
    assert_eq!(total, 4 * 1000 * 4);
}

#[test]
#[serial]
fn test_seek_failure_keeps_state() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(4, 1000);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();

    clear_error();
    assert!(music.seek(30.0).is_err());
    assert!(get_error().contains("Seek failed"), "{}", get_error());
    assert_eq!(music.tell(), Some(0.0));

    let (total, done) = drain(&mut music, 4096);
    assert!(done);
    assert_eq!(total, 4 * 1000 * 4);
}

#[test]
fn test_negative_seek_rejected() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(1, 100);
    let mut music = open(&backend, &file);
    assert!(matches!(music.seek(-1.0), Err(MusicError::InvalidArgument(_))));
}

#[test]
fn test_format_change_mid_stream() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2)
        .audio_packets(2, 100)
        .packet(SyntPacket {
            stream: 0,
            pts: 200,
            format: format_code(SampleFormat::F32P),
            rate: RATE,
            channels: 1,
            samples: 100,
            data: sample_data(SampleFormat::F32P, 1, 100),
        });
    let mut music = open(&backend, &file);
    music.play(1).unwrap();

    let mut buf = vec![0u8; 300 * 4];
    let pulled = music.play_audio(&mut buf).unwrap();
    assert_eq!(pulled.bytes, 300 * 4);

    let out = frames(&buf);
    assert!((out[0].1 as i32 - 16384).abs() <= 2);
    // mono is duplicated to both outputs
    let (left, right) = out[299];
    assert_eq!(left, right);
    assert!((left as i32 - 8192).abs() <= 2);
}

#[test]
fn test_merge_buffer_grows_for_large_frames() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::F32P, RATE, 2)
        .audio_packets(1, 256)
        .audio_packets(1, 8192);
    let mut music = open(&backend, &file);
    let initial = music.merge_buffer_capacity().unwrap();
    assert!(initial >= 2 * 4 * 4096);

    music.play(1).unwrap();
    let (total, done) = drain(&mut music, 16384);
    assert!(done);
    assert_eq!(total, (256 + 8192) * 4);
    assert!(music.merge_buffer_capacity().unwrap() >= 8192 * 4 * 2);
}

#[test]
fn test_interleaved_stream_has_no_merge_buffer() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(1, 10);
    let music = open(&backend, &file);
    assert_eq!(music.merge_buffer_capacity(), None);
}

#[test]
fn test_other_streams_are_skipped() {
    let (backend, stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2)
        .data_packet()
        .audio_packets(1, 100)
        .data_packet()
        .data_packet()
        .audio_packets(1, 100);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();

    let (total, done) = drain(&mut music, 4096);
    assert!(done);
    assert_eq!(total, 200 * 4);
    assert_eq!(stats.packets_sent.load(Ordering::SeqCst), 2);
}

#[test]
fn test_metadata_with_author_fallback() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2)
        .tag("title", "Main Theme")
        .tag("author", "Composer")
        .tag("album", "Soundtrack")
        .tag("copyright", "1992")
        .audio_packets(1, 10);
    let music = open(&backend, &file);
    assert_eq!(music.meta_tag(MetaTag::Title), Some("Main Theme"));
    assert_eq!(music.meta_tag(MetaTag::Artist), Some("Composer"));
    assert_eq!(music.meta_tag(MetaTag::Album), Some("Soundtrack"));
    assert_eq!(music.meta_tag(MetaTag::Copyright), Some("1992"));
}

#[test]
fn test_metadata_keys_are_case_sensitive() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2)
        .tag("Title", "Wrong Case")
        .tag("artist", "Band")
        .tag("author", "Ignored")
        .audio_packets(1, 10);
    let music = open(&backend, &file);
    assert_eq!(music.meta_tag(MetaTag::Title), None);
    assert_eq!(music.meta_tag(MetaTag::Artist), Some("Band"));
    assert_eq!(music.meta_tag(MetaTag::Album), None);
}

#[rstest]
#[case(2_500_000, 0, Some(2.5))]
#[case(0, 16000, Some(2.0))]
#[case(0, 0, None)]
fn test_duration(#[case] duration_us: i64, #[case] frames: u64, #[case] expected: Option<f64>) {
    let (backend, _stats) = backend();
    let mut file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(1, 10);
    file.duration_us = duration_us;
    file.frames = frames;
    let music = open(&backend, &file);
    assert_eq!(music.duration(), expected);
}

#[test]
fn test_decoder_found_by_codec_id() {
    let (backend, _stats) = backend();
    let mut file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(2, 10);
    file.names_decoder = false;
    let mut music = open(&backend, &file);
    music.play(1).unwrap();
    assert_eq!(drain(&mut music, 4096), (80, true));
}

#[test]
fn test_unknown_format_is_negotiated_on_first_frame() {
    let (backend, _stats) = backend();
    let mut file = SyntFile::new(SampleFormat::S16, 0, 0).packet(SyntPacket {
        stream: 0,
        pts: 0,
        format: format_code(SampleFormat::S32P),
        rate: RATE,
        channels: 2,
        samples: 50,
        data: sample_data(SampleFormat::S32P, 2, 50),
    });
    file.format = UNKNOWN_FORMAT;
    let mut music = open(&backend, &file);
    assert_eq!(music.merge_buffer_capacity(), None);

    music.play(1).unwrap();
    assert_eq!(drain(&mut music, 4096), (200, true));
    assert!(music.merge_buffer_capacity().is_some());
}

#[test]
#[serial]
fn test_unsupported_format_fails_open() {
    let (backend, stats) = backend();
    let file = SyntFile::new(SampleFormat::F64P, RATE, 2).audio_packets(1, 10);
    clear_error();
    let err = backend
        .open(MusicSource::from_bytes(file.build()))
        .err()
        .unwrap();
    assert!(matches!(err, MusicError::FormatUnsupported(_)));
    assert!(!get_error().is_empty());
    assert_eq!(stats.demuxers_open.load(Ordering::SeqCst), 0);
    assert_eq!(stats.decoders_open.load(Ordering::SeqCst), 0);
    assert_eq!(backend.loader().refcount(), 0);
}

#[test]
#[serial]
fn test_bad_magic_fails_and_releases_library() {
    let (backend, stats) = backend();
    clear_error();
    let result = backend.new_music(MusicSource::from_bytes(b"JUNKJUNKJUNKJUNK".to_vec()));
    assert!(result.is_err());
    assert!(
        get_error().contains("Failed to open the input"),
        "{}",
        get_error()
    );
    assert_eq!(backend.loader().refcount(), 0);
    assert!(!backend.loader().is_loaded());
    assert_eq!(stats.demuxers_open.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn test_corrupt_packet_reports_and_continues() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2)
        .packet(SyntPacket {
            stream: 0,
            pts: 0,
            format: CORRUPT,
            rate: RATE,
            channels: 2,
            samples: 0,
            data: Vec::new(),
        })
        .audio_packets(2, 100);
    let mut music = open(&backend, &file);
    music.play(1).unwrap();

    clear_error();
    let mut buf = vec![0u8; 4096];
    assert!(music.play_audio(&mut buf).is_err());
    assert!(get_error().contains("corrupt packet"), "{}", get_error());

    assert_eq!(drain(&mut music, 4096), (200 * 4, true));
}

#[test]
fn test_empty_endless_track_returns_short_fill() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2);
    let mut music = open(&backend, &file);
    music.play(-1).unwrap();

    let mut buf = vec![0u8; 256];
    let pulled = music.play_audio(&mut buf).unwrap();
    assert_eq!(pulled.bytes, 0);
    assert!(!pulled.done);
}

#[test]
fn test_volume_scales_output() {
    let (backend, _stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(1, 16);
    let mut music = open(&backend, &file);
    music.set_volume(200);
    assert_eq!(music.volume(), 128);
    music.set_volume(64);
    music.play(1).unwrap();

    let mut buf = vec![0u8; 64];
    music.play_audio(&mut buf).unwrap();
    for (left, right) in frames(&buf) {
        assert_eq!(left, 8191 / 2);
        assert_eq!(right, 16383 / 2);
    }
}

#[test]
fn test_tracks_share_one_load() {
    let (backend, stats) = backend();
    let file = SyntFile::new(SampleFormat::S16, RATE, 2).audio_packets(1, 10);
    let first = open(&backend, &file);
    let second = backend
        .new_music_ex(MusicSource::from_bytes(file.build()), "ignored")
        .unwrap();
    assert_eq!(backend.loader().refcount(), 2);
    assert_eq!(stats.demuxers_open.load(Ordering::SeqCst), 2);

    drop(first);
    assert_eq!(backend.loader().refcount(), 1);
    drop(second);
    assert_eq!(backend.loader().refcount(), 0);
    assert!(!backend.loader().is_loaded());
    assert_eq!(stats.demuxers_open.load(Ordering::SeqCst), 0);
}
