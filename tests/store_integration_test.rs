//! Integration tests for loading and storing segmented images on disk

use gzvol::{
    diagnostics::LogLevel,
    exec::{available_cores, map_parallel, WorkerPool},
    gz::{self, CompressionLevel},
    Config, DataType, DiagnosticSink, ImageDescriptor, SegmentLayout, SegmentedImageStore,
    StoreError, StoreOptions, UNBOUNDED_SEGMENT,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn image(
    dir: &Path,
    name: &str,
    datatype: DataType,
    dims: Vec<usize>,
    files: usize,
    start: u64,
) -> ImageDescriptor {
    ImageDescriptor::new(name, datatype, dims).with_segment_files(dir.join(name), files, start)
}

/// Two 8-bit files holding 100 voxels: 50 bytes each, zero payload
#[test]
fn test_new_image_two_files() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "scan", DataType::U8, vec![100], 2, 0);

    let store = SegmentedImageStore::open(desc.clone(), StoreOptions::create()).unwrap();
    assert_eq!(store.bytes_per_segment(), 50);
    assert_eq!(store.segment_count(), 2);
    store.close().unwrap();

    for file in &desc.files {
        let content = gz::read_all(&file.name).unwrap();
        assert_eq!(content, vec![0u8; 50]);
    }
}

#[test]
fn test_roundtrip_byte_aligned_types() {
    let temp_dir = TempDir::new().unwrap();
    let types = [
        DataType::U8,
        DataType::I16,
        DataType::U32,
        DataType::F32,
        DataType::F64,
        DataType::CF64,
    ];

    for (i, datatype) in types.into_iter().enumerate() {
        let desc = image(
            temp_dir.path(),
            &format!("vol{}", i),
            datatype,
            vec![6, 5, 4],
            3,
            5,
        );
        let header = b"HDR!\n".to_vec();

        let mut store = SegmentedImageStore::open(
            desc.clone(),
            StoreOptions::create().with_lead_in(header.clone()),
        )
        .unwrap();
        for (j, byte) in store.data_mut().iter_mut().enumerate() {
            *byte = (j * 31 + i) as u8;
        }
        let written = store.data().to_vec();
        store.close().unwrap();

        let reopened = SegmentedImageStore::open(desc.clone(), StoreOptions::read_only()).unwrap();
        assert_eq!(reopened.data(), &written[..], "{:?}", datatype);
        assert_eq!(reopened.lead_in(), Some(&header[..]));
        assert_eq!(reopened.segment_voxel_count(), UNBOUNDED_SEGMENT);
        assert_eq!(reopened.segment_addresses().len(), 1);

        let expected_file_len = header.len() + reopened.bytes_per_segment();
        for file in &desc.files {
            assert_eq!(gz::read_all(&file.name).unwrap().len(), expected_file_len);
        }
    }
}

#[test]
fn test_bit_packed_multi_file() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "mask", DataType::Bit, vec![20, 4], 4, 0);

    let mut store = SegmentedImageStore::open(desc.clone(), StoreOptions::create()).unwrap();
    assert_eq!(store.layout(), SegmentLayout::BitPacked);
    assert_eq!(store.segment_voxel_count(), 20);
    assert_eq!(store.bytes_per_segment(), 3);
    let addresses = store.segment_addresses().to_vec();
    assert_eq!(addresses.len(), 4);
    for (n, range) in addresses.iter().enumerate() {
        assert_eq!(range.start, n * 3);
        assert_eq!(range.len(), 3);
    }

    for n in 0..4 {
        store.set_bit(n, 19 - n, true).unwrap();
    }
    store.close().unwrap();

    let reopened = SegmentedImageStore::open(desc, StoreOptions::read_only()).unwrap();
    for n in 0..4 {
        for bit in 0..20 {
            assert_eq!(reopened.get_bit(n, bit).unwrap(), bit == 19 - n);
        }
    }
}

#[test]
fn test_zero_files_is_configuration_error() {
    let desc = ImageDescriptor::new("nothing", DataType::F32, vec![4, 4]);
    let err = SegmentedImageStore::open(desc, StoreOptions::create()).unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
}

#[test]
fn test_oversized_is_capacity_error() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(
        temp_dir.path(),
        "huge",
        DataType::CF64,
        vec![usize::MAX / 4, 2],
        2,
        0,
    );
    let err = SegmentedImageStore::open(desc, StoreOptions::create()).unwrap_err();
    assert!(matches!(err, StoreError::Capacity(_)));
    assert!(!temp_dir.path().join("huge-000.gz").exists());
}

#[test]
fn test_read_only_close_leaves_files_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "ro", DataType::U16, vec![32], 2, 0);
    let mut store = SegmentedImageStore::open(desc.clone(), StoreOptions::create()).unwrap();
    store.data_mut().fill(0x11);
    store.close().unwrap();

    let before: Vec<Vec<u8>> = desc
        .files
        .iter()
        .map(|f| std::fs::read(&f.name).unwrap())
        .collect();

    let mut store = SegmentedImageStore::open(desc.clone(), StoreOptions::read_only()).unwrap();
    store.data_mut().fill(0xee);
    store.close().unwrap();

    let after: Vec<Vec<u8>> = desc
        .files
        .iter()
        .map(|f| std::fs::read(&f.name).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_read_write_reopen_preserves_captured_lead_in() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "hdr", DataType::U8, vec![8], 2, 4);

    // Files written by someone else, header included
    for (n, file) in desc.files.iter().enumerate() {
        let mut content = b"NIFT".to_vec();
        content.extend(std::iter::repeat(n as u8).take(4));
        gz::write_all(&file.name, &content, CompressionLevel::default()).unwrap();
    }

    let mut store = SegmentedImageStore::open(desc.clone(), StoreOptions::read_write()).unwrap();
    assert_eq!(store.lead_in(), Some(&b"NIFT"[..]));
    assert_eq!(store.data(), &[0, 0, 0, 0, 1, 1, 1, 1]);
    store.file_payload_mut(1).unwrap()[0] = 9;
    store.close().unwrap();

    assert_eq!(gz::read_all(&desc.files[0].name).unwrap(), b"NIFT\0\0\0\0");
    assert_eq!(
        gz::read_all(&desc.files[1].name).unwrap(),
        b"NIFT\x09\x01\x01\x01"
    );
}

#[test]
fn test_corrupt_segment_aborts_open() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "bad", DataType::U8, vec![8], 2, 0);
    gz::write_all(&desc.files[0].name, &[1u8; 4], CompressionLevel::default()).unwrap();
    std::fs::write(&desc.files[1].name, b"not gzip at all").unwrap();

    let mut store = SegmentedImageStore::new(desc, StoreOptions::read_only());
    assert!(store.load().unwrap_err().is_io());
    assert!(!store.is_loaded());
}

#[test]
fn test_write_failure_leaves_later_files_unwritten() {
    let temp_dir = TempDir::new().unwrap();
    let missing_dir = temp_dir.path().join("missing");
    let desc = ImageDescriptor::new("split", DataType::U8, vec![4])
        .with_file(temp_dir.path().join("split-0.gz"), 0)
        .with_file(missing_dir.join("split-1.gz"), 0)
        .with_file(temp_dir.path().join("split-2.gz"), 0);

    let (sink, err_writer) = error_capturing_sink();
    let store =
        SegmentedImageStore::open(desc, StoreOptions::create().with_sink(sink)).unwrap();
    let err = store.close().unwrap_err();
    assert!(err.is_io());
    assert!(temp_dir.path().join("split-0.gz").exists());
    assert!(!temp_dir.path().join("split-2.gz").exists());

    let reported = err_writer.text();
    assert!(reported.starts_with("gzvol: "));
    assert!(reported.contains("split-1.gz"));
}

#[test]
fn test_drop_reports_write_failure_to_sink() {
    let temp_dir = TempDir::new().unwrap();
    let desc = ImageDescriptor::new("dropped", DataType::U8, vec![6])
        .with_file(temp_dir.path().join("dropped-0.gz"), 0)
        .with_file(temp_dir.path().join("missing").join("dropped-1.gz"), 0)
        .with_file(temp_dir.path().join("dropped-2.gz"), 0);

    let (sink, err_writer) = error_capturing_sink();
    {
        let mut store =
            SegmentedImageStore::open(desc, StoreOptions::create().with_sink(sink)).unwrap();
        store.data_mut().fill(3);
    }

    let reported = err_writer.text();
    assert!(reported.starts_with("gzvol: IO error on "), "{}", reported);
    assert!(reported.contains("dropped-1.gz"));
    assert_eq!(reported.lines().count(), 1);

    assert_eq!(
        gz::read_all(temp_dir.path().join("dropped-0.gz")).unwrap(),
        vec![3, 3]
    );
    assert!(!temp_dir.path().join("dropped-2.gz").exists());
}

#[test]
fn test_load_concatenated_gzip_members() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "multi", DataType::U8, vec![4], 1, 4);

    let header = temp_dir.path().join("header.gz");
    let payload = temp_dir.path().join("payload.gz");
    gz::write_all(&header, b"HDR!", CompressionLevel::default()).unwrap();
    gz::write_all(&payload, &[1, 2, 3, 4], CompressionLevel::default()).unwrap();
    let mut joined = std::fs::read(&header).unwrap();
    joined.extend(std::fs::read(&payload).unwrap());
    std::fs::write(&desc.files[0].name, joined).unwrap();

    let store = SegmentedImageStore::open(desc, StoreOptions::read_only()).unwrap();
    assert_eq!(store.data(), &[1, 2, 3, 4]);
    assert_eq!(store.lead_in(), Some(&b"HDR!"[..]));
}

#[test]
fn test_stores_processed_on_worker_threads() {
    let temp_dir = TempDir::new().unwrap();
    let config =
        Config::from_json_str(r#"{"number_of_threads": 3, "log_level": "Quiet"}"#).unwrap();
    let sink = config.diagnostic_sink();

    let descriptors: Vec<_> = (0..6)
        .map(|i| image(temp_dir.path(), &format!("w{}", i), DataType::U8, vec![10], 2, 0))
        .collect();

    let pool = WorkerPool::from_config(&config, &sink).unwrap();
    assert_eq!(pool.threads(), available_cores(&config));
    let results = pool.map(
        descriptors.clone(),
        |desc: ImageDescriptor, sink: &DiagnosticSink| -> gzvol::Result<()> {
            let fill = desc.name.as_bytes()[1];
            let options = StoreOptions::from_config(&config)
                .with_new(true)
                .with_read_write(true)
                .with_sink(sink.clone());
            let mut store = SegmentedImageStore::open(desc, options)?;
            store.data_mut().fill(fill);
            store.close()
        },
    );
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.is_ok()));

    for desc in descriptors {
        let fill = desc.name.as_bytes()[1];
        let store = SegmentedImageStore::open(desc, StoreOptions::read_only()).unwrap();
        assert!(store.data().iter().all(|&b| b == fill));
    }
}

#[test]
fn test_map_parallel_reports_per_item_errors() {
    let temp_dir = TempDir::new().unwrap();
    let (sink, err_writer) = error_capturing_sink();
    let descriptors = vec![
        image(temp_dir.path(), "ok", DataType::U8, vec![2], 1, 0),
        ImageDescriptor::new("empty", DataType::U8, vec![2]),
    ];

    let results = map_parallel(&sink, 2, descriptors, |desc, sink| {
        SegmentedImageStore::open(desc, StoreOptions::create().with_sink(sink.clone()))
            .and_then(|store| store.close())
    })
    .unwrap();

    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(StoreError::Configuration(_))));
    assert!(err_writer.text().contains("no files specified"));
}

#[tokio::test]
async fn test_async_open_and_close() {
    let temp_dir = TempDir::new().unwrap();
    let desc = image(temp_dir.path(), "async", DataType::I32, vec![3, 3], 1, 0);

    let mut store = SegmentedImageStore::open_async(desc.clone(), StoreOptions::create())
        .await
        .unwrap();
    store.data_mut()[..4].copy_from_slice(&7i32.to_le_bytes());
    store.close_async().await.unwrap();

    let reopened = SegmentedImageStore::open_async(desc, StoreOptions::read_only())
        .await
        .unwrap();
    assert_eq!(&reopened.data()[..4], &7i32.to_le_bytes());
    assert_eq!(reopened.data().len(), 36);
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

/// Sink at error level whose error stream can be inspected
fn error_capturing_sink() -> (DiagnosticSink, SharedBuf) {
    let errors = SharedBuf::default();
    let sink = DiagnosticSink::with_writers(
        "gzvol",
        LogLevel::Error,
        Box::new(Vec::<u8>::new()),
        Box::new(errors.clone()),
    );
    (sink, errors)
}

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
