//! Track assembly from the record stream.
//!
//! Valid waypoints accumulate into the current track. A `RESET COUNTER` log
//! message closes the current track; everything else is skipped.

use {
    crate::{
        error::Result,
        record::{Record, Waypoint},
    },
    chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc},
    std::fmt,
};

/// One point of a track.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrackPoint {
    /// Index of the source record.
    pub index: u32,
    /// Device timestamp in UTC.
    pub time: NaiveDateTime,
    /// Fix data.
    pub waypoint: Waypoint,
}

impl TrackPoint {
    /// Build a point from a valid, timestamped waypoint record.
    pub fn from_record(record: &Record) -> Option<Self> {
        if !record.valid {
            return None;
        }
        Some(Self {
            index: record.index,
            time: record.timestamp?,
            waypoint: *record.waypoint()?,
        })
    }

    /// Timestamp in the local time zone.
    pub fn local_time(&self) -> DateTime<Local> {
        Utc.from_utc_datetime(&self.time)
            .with_timezone(&Local)
    }
}

/// An assembled track. Never empty.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Track {
    index: usize,
    points: Vec<TrackPoint>,
}

impl Track {
    fn new(index: usize, points: Vec<TrackPoint>) -> Option<Self> {
        if points.is_empty() {
            None
        } else {
            Some(Self { index, points })
        }
    }

    /// Zero-based position of the track on the device.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Points in recording order.
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// First point.
    pub fn first_point(&self) -> &TrackPoint {
        &self.points[0]
    }

    /// Last point.
    pub fn last_point(&self) -> &TrackPoint {
        &self.points[self.points.len() - 1]
    }

    /// Start time in the local time zone.
    pub fn first_time(&self) -> DateTime<Local> {
        self.first_point()
            .local_time()
    }

    /// End time in the local time zone.
    pub fn last_time(&self) -> DateTime<Local> {
        self.last_point()
            .local_time()
    }

    /// Number of points.
    pub fn num_points(&self) -> usize {
        self.points
            .len()
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {} points:[{}]",
            self.index,
            self.first_time().format("%Y/%m/%d %H:%M:%S"),
            self.last_time().format("%Y/%m/%d %H:%M:%S"),
            self.num_points()
        )
    }
}

/// Iterator adapter grouping records into tracks.
///
/// Ends after passing through the first error of the underlying stream.
pub struct Tracks<I> {
    records: I,
    pending: Vec<TrackPoint>,
    next_index: usize,
    done: bool,
}

impl<I> Tracks<I>
where
    I: Iterator<Item = Result<Record>>,
{
    /// Wrap a record stream.
    pub fn new(records: I) -> Self {
        Self {
            records,
            pending: Vec::new(),
            next_index: 0,
            done: false,
        }
    }

    fn flush(&mut self) -> Option<Track> {
        let points = std::mem::take(&mut self.pending);
        let track = Track::new(self.next_index, points)?;
        self.next_index += 1;
        Some(track)
    }
}

impl<I> Iterator for Tracks<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Track>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.records.next() {
                Some(Ok(record)) => {
                    if record.is_reset_marker() {
                        if let Some(track) = self.flush() {
                            return Some(Ok(track));
                        }
                    } else if let Some(point) = TrackPoint::from_record(&record) {
                        self.pending.push(point);
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                },
                None => {
                    self.done = true;
                    return self.flush().map(Ok);
                },
            }
        }
    }
}

/// Group `records` into tracks.
pub fn assemble<I>(records: I) -> Tracks<I::IntoIter>
where
    I: IntoIterator<Item = Result<Record>>,
{
    Tracks::new(records.into_iter())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            error::Error,
            port::mock::{log_bytes, waypoint_bytes},
            record::RecordDecoder,
        },
    };

    fn records(raws: &[[u8; 32]]) -> Vec<Result<Record>> {
        let decoder = RecordDecoder::with_current_year(2026);
        raws.iter()
            .enumerate()
            .map(|(i, raw)| decoder.decode(i as u32, raw))
            .collect()
    }

    fn wp(minute: u16) -> [u8; 32] {
        waypoint_bytes(0x06, 0x83, (15 << 11) | (10 << 6) | minute, 0, 377_749_000, -1_224_194_000)
    }

    #[test]
    fn test_reset_counter_splits_tracks() {
        let stream = records(&[
            wp(1),
            wp(2),
            log_bytes("RESET COUNTER"),
            wp(3),
            wp(4),
            wp(5),
        ]);
        let tracks: Vec<Track> = assemble(stream)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].num_points(), 2);
        assert_eq!(tracks[1].num_points(), 3);
        assert_eq!(tracks[0].index(), 0);
        assert_eq!(tracks[1].index(), 1);
        assert_eq!(tracks[1].first_point().index, 3);
        assert_eq!(tracks[1].last_point().index, 5);
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        assert_eq!(assemble(Vec::new()).count(), 0);
    }

    #[test]
    fn test_leading_and_repeated_markers_yield_no_empty_tracks() {
        let stream = records(&[
            log_bytes("RESET COUNTER"),
            log_bytes("RESET COUNTER"),
            wp(1),
            log_bytes("RESET COUNTER"),
        ]);
        let tracks: Vec<Track> = assemble(stream)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].num_points(), 1);
    }

    #[test]
    fn test_invalid_records_and_other_logs_are_ignored() {
        let null_fix = waypoint_bytes(0x06, 0x83, 0x7A9E, 0, 0, 0);
        let flagged = waypoint_bytes(0x26, 0x83, 0x7A9E, 0, 1, 1);
        let bad_date = waypoint_bytes(0x06, 0x80, 0x7A9E, 0, 1, 1);
        let stream = records(&[wp(1), null_fix, log_bytes("POWER ON"), flagged, bad_date, wp(2)]);
        let tracks: Vec<Track> = assemble(stream)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].num_points(), 2);
    }

    #[test]
    fn test_error_passes_through_and_ends_stream() {
        let mut stream = records(&[wp(1), log_bytes("RESET COUNTER"), wp(2)]);
        stream.insert(2, Err(Error::UnimplementedRecordKind(0xF5)));
        let mut tracks = assemble(stream);

        assert!(tracks.next().unwrap().is_ok());
        assert!(matches!(
            tracks.next(),
            Some(Err(Error::UnimplementedRecordKind(0xF5)))
        ));
        assert!(tracks.next().is_none());
    }

    #[test]
    fn test_track_display() {
        let stream = records(&[wp(1), wp(2)]);
        let track = assemble(stream)
            .next()
            .unwrap()
            .unwrap();
        let line = track.to_string();
        assert!(line.starts_with("0: "));
        assert!(line.ends_with(" points:[2]"));
    }
}
