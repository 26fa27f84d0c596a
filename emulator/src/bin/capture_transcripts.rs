use std::io;

#[allow(dead_code)]
#[path = "../hardware.rs"]
mod hardware;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Detection)?;
    record_profile(TranscriptProfile::Manual)?;
    record_profile(TranscriptProfile::Timeout)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    let script: &[&str] = match profile {
        TranscriptProfile::Detection => &[
            "status",
            "target 80",
            "advance 120",
            "target 25",
            "advance 40",
            "advance 700",
            "target none",
            "advance 40",
            "history",
        ],
        TranscriptProfile::Manual => &[
            "target 150",
            "pot 1023",
            "press",
            "advance 40",
            "release",
            "advance 740",
            "status",
        ],
        TranscriptProfile::Timeout => &[
            "measure",
            "advance 80",
            "target 500",
            "advance 40",
            "target 12",
            "measure",
            "saturate",
            "status",
        ],
    };

    for command in script {
        let _ = session.handle_command(command)?;
    }
    Ok(())
}
