//! GPX 1.1 output.
//!
//! Each track becomes one `<trk>` with a single `<trkseg>`. Speed, course
//! and the horizontal error estimate go into `gotu:` extension elements.

use anyhow::{Context, Result};
use gotu::{Track, TrackPoint};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Namespace of the extension elements.
pub(crate) const EXTENSION_NAMESPACE: &str = "urn:gotu:gpx-extensions:1";

const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str =
    "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd";

/// Track name: `prefix` followed by the local start time.
pub(crate) fn track_name(prefix: &str, track: &Track) -> String {
    format!(
        "{prefix} {}",
        track
            .first_time()
            .format("%Y/%m/%d %H:%M:%S")
    )
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_header<W: Write>(writer: &mut Writer<W>) -> Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
    let root = BytesStart::new("gpx").with_attributes([
        ("xmlns", GPX_NAMESPACE),
        ("xmlns:gotu", EXTENSION_NAMESPACE),
        ("xmlns:xsi", XSI_NAMESPACE),
        ("creator", "gotu"),
        ("version", "1.1"),
        ("xsi:schemaLocation", SCHEMA_LOCATION),
    ]);
    writer.write_event(Event::Start(root))?;
    Ok(())
}

fn write_point<W: Write>(writer: &mut Writer<W>, point: &TrackPoint) -> Result<()> {
    let wp = &point.waypoint;
    let lat = format!("{:.7}", wp.latitude);
    let lon = format!("{:.7}", wp.longitude);
    let elem = BytesStart::new("trkpt").with_attributes([("lat", lat.as_str()), ("lon", lon.as_str())]);
    writer.write_event(Event::Start(elem))?;

    write_text_element(writer, "ele", &format!("{:.2}", wp.elevation))?;
    let time = point
        .time
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();
    write_text_element(writer, "time", &time)?;
    write_text_element(writer, "sat", &wp.satellites.to_string())?;

    writer.write_event(Event::Start(BytesStart::new("extensions")))?;
    write_text_element(writer, "gotu:speed", &format!("{:.2}", wp.speed))?;
    write_text_element(writer, "gotu:course", &format!("{:.2}", wp.course))?;
    write_text_element(writer, "gotu:ehpe", &format!("{:.2}", wp.ehpe))?;
    writer.write_event(Event::End(BytesEnd::new("extensions")))?;

    writer.write_event(Event::End(BytesEnd::new("trkpt")))?;
    Ok(())
}

fn write_track<W: Write>(writer: &mut Writer<W>, prefix: &str, track: &Track) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("trk")))?;
    write_text_element(writer, "name", &track_name(prefix, track))?;
    writer.write_event(Event::Start(BytesStart::new("trkseg")))?;
    for point in track.points() {
        write_point(writer, point)?;
    }
    writer.write_event(Event::End(BytesEnd::new("trkseg")))?;
    writer.write_event(Event::End(BytesEnd::new("trk")))?;
    Ok(())
}

/// Write a complete GPX document.
///
/// Stops at the first track error. The document is left unterminated then.
pub(crate) fn write_gpx<W, I>(out: &mut W, tracks: I, prefix: &str) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = gotu::Result<Track>>,
{
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    write_header(&mut writer)?;
    let mut written = 0;
    for track in tracks {
        let track = track.context("Download failed")?;
        write_track(&mut writer, prefix, &track)?;
        written += 1;
    }
    writer.write_event(Event::End(BytesEnd::new("gpx")))?;
    writer
        .into_inner()
        .write_all(b"\n")?;
    Ok(written)
}

/// Write tracks to `dest` atomically.
///
/// The document goes to a temporary file next to `dest` which replaces
/// `dest` only once the closing tag is written. On error `dest` is
/// untouched. Returns the number of tracks written.
pub(crate) fn write_gpx_file<I>(dest: &Path, tracks: I, prefix: &str) -> Result<usize>
where
    I: IntoIterator<Item = gotu::Result<Track>>,
{
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dir.display()))?;

    let written = {
        let mut out = BufWriter::new(&mut tmp);
        let written = write_gpx(&mut out, tracks, prefix)?;
        out.flush()
            .context("Failed to write GPX data")?;
        written
    };

    tmp.persist(dest)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(written)
}
