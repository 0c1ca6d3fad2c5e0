/**
 * Per-file decisions: resolve the capture time, plan, then move or echo
 */

use log::{error, info, warn};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::exif::{RawRecord, TimestampResolver};
use crate::file_ops::{FileMover, MoveOutcome};
use crate::naming::{DestinationPlan, DestinationPlanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Moved,
    Replaced,
    /// Destination exists and replacing is off.
    Skipped,
    /// Already at its destination.
    Unchanged,
    /// Dry run: plan printed, nothing touched.
    Planned,
    Failed,
}

impl From<MoveOutcome> for FileOutcome {
    fn from(outcome: MoveOutcome) -> Self {
        match outcome {
            MoveOutcome::Moved => FileOutcome::Moved,
            MoveOutcome::Replaced => FileOutcome::Replaced,
            MoveOutcome::SkippedExists => FileOutcome::Skipped,
        }
    }
}

pub struct Organizer {
    resolver: TimestampResolver,
    planner: DestinationPlanner,
    mover: FileMover,
    dry_run: bool,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Organizer {
    /// `output` receives one line per plan in dry-run mode.
    pub fn new(
        planner: DestinationPlanner,
        mover: FileMover,
        dry_run: bool,
        output: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            resolver: TimestampResolver::new(),
            planner,
            mover,
            dry_run,
            output: Mutex::new(output),
        }
    }

    pub fn handle(&self, path: &Path, record: &RawRecord) -> FileOutcome {
        let capture = match self.resolver.resolve(record) {
            Ok(capture) => capture,
            Err(e) => {
                error!(file_path:% = path.display(), data:% = record.summary(); "{}", e);
                return FileOutcome::Failed;
            }
        };

        let plan = match self.planner.plan(path, &capture) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                info!(file_path:% = path.display(); "file already has its {} destination", self.planner.mode().as_str());
                return FileOutcome::Unchanged;
            }
            Err(e) => {
                error!(file_path:% = path.display(); "{}", e);
                return FileOutcome::Failed;
            }
        };

        if self.dry_run {
            self.echo(&plan, record);
            return FileOutcome::Planned;
        }

        match self.mover.apply(&plan) {
            Ok(MoveOutcome::SkippedExists) => {
                info!(
                    file_path:% = path.display(), new_file_path:% = plan.destination.display();
                    "file already exists, skipping (use --replace-if-exists to replace it)"
                );
                FileOutcome::Skipped
            }
            Ok(outcome) => {
                info!(
                    file_path:% = path.display(), new_file_path:% = plan.destination.display();
                    "{} file", verb(outcome)
                );
                outcome.into()
            }
            Err(e) => {
                error!(file_path:% = path.display(); "{}", e);
                FileOutcome::Failed
            }
        }
    }

    fn echo(&self, plan: &DestinationPlan, record: &RawRecord) {
        let mut output = match self.output.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(
            output,
            "{} => {} {}",
            plan.source.display(),
            plan.destination.display(),
            record.summary()
        ) {
            warn!(file_path:% = plan.source.display(); "failed to write dry-run output: {}", e);
        }
    }
}

fn verb(outcome: MoveOutcome) -> &'static str {
    match outcome {
        MoveOutcome::Moved => "moved",
        MoveOutcome::Replaced => "replaced",
        MoveOutcome::SkippedExists => "skipped",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exif::{CREATE_DATE, SOURCE_FILE, SUBSEC_DATE_TIME_ORIGINAL, TIME_ZONE};
    use crate::naming::Mode;
    use std::fs;
    use std::io;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Cloneable in-memory writer for dry-run output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn organizer(mode: Mode, replace: bool, dry_run: bool, out: &SharedBuffer) -> Organizer {
        Organizer::new(
            DestinationPlanner::new(mode),
            FileMover::new(replace),
            dry_run,
            Box::new(out.clone()),
        )
    }

    fn subsec_record(path: &Path) -> RawRecord {
        [
            (SOURCE_FILE, path.to_string_lossy().into_owned()),
            (SUBSEC_DATE_TIME_ORIGINAL, "2023:05:10 14:22:01.500-07:00".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn rename_mode_renames_in_place() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("photo.CR2");
        fs::write(&source, b"raw").unwrap();

        let out = SharedBuffer::default();
        let outcome = organizer(Mode::Rename, false, false, &out).handle(&source, &subsec_record(&source));

        assert_eq!(outcome, FileOutcome::Moved);
        assert!(!source.exists());
        assert_eq!(
            fs::read(tmp.path().join("2023-05-10T142201.500-0700.CR2")).unwrap(),
            b"raw"
        );
        assert!(out.contents().is_empty());
    }

    #[test]
    fn rename_twice_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("photo.CR2");
        fs::write(&source, b"raw").unwrap();
        let out = SharedBuffer::default();
        let organizer = organizer(Mode::Rename, false, false, &out);

        assert_eq!(organizer.handle(&source, &subsec_record(&source)), FileOutcome::Moved);
        let renamed = tmp.path().join("2023-05-10T142201.500-0700.CR2");
        assert_eq!(organizer.handle(&renamed, &subsec_record(&renamed)), FileOutcome::Unchanged);
        assert!(renamed.exists());
    }

    #[test]
    fn partition_mode_creates_date_directory() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();
        let record: RawRecord = [
            (CREATE_DATE, "2023:05:10 14:22:01"),
            (TIME_ZONE, "-07:00"),
        ]
        .into_iter()
        .collect();

        let out = SharedBuffer::default();
        let outcome = organizer(Mode::Partition, false, false, &out).handle(&source, &record);

        assert_eq!(outcome, FileOutcome::Moved);
        assert!(tmp.path().join("2023-05-10").is_dir());
        assert_eq!(fs::read(tmp.path().join("2023-05-10/a.jpg")).unwrap(), b"a");
    }

    #[test]
    fn existing_destination_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        fs::write(&source, b"new").unwrap();
        fs::create_dir(tmp.path().join("2023-05-10")).unwrap();
        fs::write(tmp.path().join("2023-05-10/a.jpg"), b"old").unwrap();

        let out = SharedBuffer::default();
        let outcome = organizer(Mode::Partition, false, false, &out).handle(&source, &subsec_record(&source));

        assert_eq!(outcome, FileOutcome::Skipped);
        assert_eq!(fs::read(tmp.path().join("2023-05-10/a.jpg")).unwrap(), b"old");
        assert!(source.exists());

        let outcome = organizer(Mode::Partition, true, false, &out).handle(&source, &subsec_record(&source));
        assert_eq!(outcome, FileOutcome::Replaced);
        assert_eq!(fs::read(tmp.path().join("2023-05-10/a.jpg")).unwrap(), b"new");
    }

    #[test]
    fn dry_run_echoes_and_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();

        let out = SharedBuffer::default();
        let outcome = organizer(Mode::Partition, false, true, &out).handle(&source, &subsec_record(&source));

        assert_eq!(outcome, FileOutcome::Planned);
        assert!(source.exists());
        assert!(!tmp.path().join("2023-05-10").exists());
        let expected = format!(
            "{} => {} {{\"SourceFile\":\"{}\",\"SubSecDateTimeOriginal\":\"2023:05:10 14:22:01.500-07:00\"}}\n",
            source.display(),
            tmp.path().join("2023-05-10").join("a.jpg").display(),
            source.display(),
        );
        assert_eq!(out.contents(), expected);
    }

    #[test]
    fn unresolved_file_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();
        let record: RawRecord = [(SOURCE_FILE, "a.jpg")].into_iter().collect();

        let out = SharedBuffer::default();
        let outcome = organizer(Mode::Rename, true, false, &out).handle(&source, &record);

        assert_eq!(outcome, FileOutcome::Failed);
        assert!(source.exists());
    }
}
