use std::fs;
use std::path::Path;

use decsx_lib::container::{HEADER_LEN, IMAGE_MAGIC};
use decsx_lib::{
    Container, DecsxError, ErrorKind, ExportOptions, GlobalType, ImageMetadata, ListingLayout, export_container,
    export_image, export_image_with_options,
};

#[derive(Default)]
struct Buf(Vec<u8>);

impl Buf {
    fn u32(mut self, v: u32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn str(mut self, s: &str) -> Self {
        let units: Vec<u16> = s.encode_utf16().collect();
        self = self.u32(units.len() as u32);
        for u in units {
            self.0.extend_from_slice(&u.to_le_bytes());
        }
        self
    }
}

fn image_file(sections: &[(&[u8; 8], Vec<u8>)]) -> Vec<u8> {
    let mut data = IMAGE_MAGIC.to_vec();
    data.resize(HEADER_LEN, 0);
    for (id, payload) in sections {
        data.extend_from_slice(&id[..]);
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
    }
    data
}

fn sample() -> Vec<u8> {
    let image: Vec<u8> = (0u8..48).collect();
    let functions = Buf::default()
        .u32(1)
        .u32(0)
        .u32(0)
        .u32(2)
        .u32(16)
        .str("main")
        .u32(32)
        .str("sub/routine");
    let conststr = Buf::default().u32(1).str("hello").u32(1).u32(20);
    let global = Buf::default()
        .u32(2)
        .str("counter")
        .u32(4)
        .u32(7)
        .str("scale")
        .u32(5)
        .u32(0x3f80_0000);
    let linkinf = Buf::default().u32(0).u32(0).u32(0);

    image_file(&[
        (b"image   ", image),
        (b"function", functions.0),
        (b"conststr", conststr.0),
        (b"global  ", global.0),
        (b"linkinf ", linkinf.0),
        (b"xdata   ", vec![9, 9, 9]),
    ])
}

fn write_input(dir: &Path, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join("sample.csx");
    fs::write(&path, data).unwrap();
    path
}

#[test]
fn decodes_all_tables_from_one_container() {
    let c = Container::from_bytes(&sample()).unwrap();
    let meta = ImageMetadata::decode(&c);

    assert!(meta.failures.is_empty());
    assert_eq!(meta.functions.dispatch_offsets(), vec![0, 16, 32]);
    assert_eq!(meta.strings.get(20), Some("hello"));
    assert_eq!(meta.globals.globals[1].type_tag, GlobalType::Real);
    assert_eq!(meta.globals.globals[1].init_value, Some(0x3f80_0000));
    assert!(meta.links.targets.is_empty());
}

#[test]
fn export_writes_sections_and_per_function_listings() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), &sample());
    let out = tmp.path().join("out");

    let summary = export_image(&input, &out).unwrap();

    assert_eq!(summary.sections_written.len(), 6);
    assert_eq!(fs::read(out.join("xdata")).unwrap(), vec![9, 9, 9]);
    assert_eq!(fs::read(out.join("image")).unwrap(), (0u8..48).collect::<Vec<_>>());

    let report = summary.dispatch.unwrap();
    assert_eq!(report.launched, 3);
    assert!(report.failures.is_empty());
    assert!(report.peak_outstanding <= 3);

    let main = fs::read_to_string(out.join("listing/00000010_main.txt")).unwrap();
    assert!(main.starts_with("function main @ 0x00000010 (16 bytes)"));
    assert!(main.contains("string \"hello\""));
    assert!(out.join("listing/00000020_sub_routine.txt").is_file());
    assert!(out.join("listing/00000000.txt").is_file());
}

#[test]
fn single_layout_without_sections() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), &sample());
    let out = tmp.path().join("out");
    let options = ExportOptions {
        jobs: 1,
        layout: ListingLayout::Single,
        export_sections: false,
        strict: true,
    };

    let mut progress = Vec::new();
    let summary = export_image_with_options(&input, &out, &options, |p| progress.push((p.launched, p.total))).unwrap();

    assert!(summary.sections_written.is_empty());
    assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
    assert!(!out.join("image").exists());
    let text = fs::read_to_string(out.join("listing.txt")).unwrap();
    assert_eq!(text.matches("function ").count(), 3);
}

#[test]
fn strict_mode_reports_failed_functions_after_writing() {
    let tmp = tempfile::tempdir().unwrap();
    let functions = Buf::default().u32(2).u32(0).u32(0x1000).u32(0).u32(0);
    let data = image_file(&[(b"image   ", vec![0; 8]), (b"function", functions.0)]);
    let c = Container::from_bytes(&data).unwrap();
    let meta = ImageMetadata::decode(&c);
    let out = tmp.path().join("out");

    let options = ExportOptions { strict: true, ..ExportOptions::default() };
    let err = export_container(&c, &meta, &out, &options, |_| {}).unwrap_err();
    assert!(matches!(err, DecsxError::DecompileFailures(1)));
    assert_eq!(err.kind(), ErrorKind::Decompile);
    assert!(out.join("listing/00000000.txt").is_file());

    let lenient = export_container(&c, &meta, &out, &ExportOptions::default(), |_| {}).unwrap();
    assert_eq!(lenient.dispatch.unwrap().failures[0].offset, 0x1000);
}

#[test]
fn missing_input_is_an_io_error_and_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let err = export_image(&tmp.path().join("nope.csx"), &out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!out.exists());
}

#[test]
fn bad_magic_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut data = sample();
    data[0] = b'c';
    let input = write_input(tmp.path(), &data);
    let out = tmp.path().join("out");

    let err = export_image(&input, &out).unwrap_err();
    assert!(matches!(err, DecsxError::BadMagic(_)));
    assert!(!out.exists());
}

#[test]
fn container_without_image_still_exports_sections() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path(), &image_file(&[(b"conststr", Buf::default().u32(0).0)]));
    let out = tmp.path().join("out");

    let summary = export_image(&input, &out).unwrap();
    assert!(summary.dispatch.is_none());
    assert!(out.join("conststr").is_file());
    assert!(!out.join("listing").exists());
}
