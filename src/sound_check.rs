//! `sound-check`: try every way of making noise and report what happened.

use std::io::Write;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a program and report its exit code and stderr.
    Run { program: &'static str, args: Vec<String> },
    /// Run a program and print its stdout.
    Query { program: &'static str, args: Vec<String> },
    Bell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub title: &'static str,
    pub actions: Vec<Action>,
}

fn sound(name: &str) -> String {
    format!("/System/Library/Sounds/{name}.aiff")
}

fn osascript(script: &str) -> Vec<String> {
    vec!["-e".to_string(), script.to_string()]
}

/// The diagnostic steps, in order. Raising the output volume only happens
/// with `loud`.
pub fn plan(loud: bool) -> Vec<Step> {
    let mut steps = vec![
        Step {
            title: "Testing afplay directly",
            actions: vec![Action::Run {
                program: "afplay",
                args: vec![sound("Glass")],
            }],
        },
        Step {
            title: "Testing osascript beep",
            actions: vec![Action::Run {
                program: "osascript",
                args: osascript("beep"),
            }],
        },
        Step {
            title: "Testing terminal bell",
            actions: vec![Action::Bell],
        },
        Step {
            title: "Checking volume settings",
            actions: vec![Action::Query {
                program: "osascript",
                args: osascript("get volume settings"),
            }],
        },
    ];
    if loud {
        steps.push(Step {
            title: "Testing louder sound (Hero) at full volume",
            actions: vec![
                Action::Run {
                    program: "osascript",
                    args: osascript("set volume output volume 100"),
                },
                Action::Run {
                    program: "afplay",
                    args: vec![sound("Hero")],
                },
            ],
        });
    }
    steps
}

/// Run the plan, writing a report to `out`. A missing tool is reported and
/// the next step still runs.
pub fn run(loud: bool, pause: Duration, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Testing sound output methods...")?;
    for (i, step) in plan(loud).iter().enumerate() {
        writeln!(out, "\n{}. {}:", i + 1, step.title)?;
        for action in &step.actions {
            perform(action, out)?;
        }
        out.flush()?;
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
    if !loud {
        writeln!(out, "\nRun with --loud to retry at full volume.")?;
    }
    writeln!(out, "\nDid you hear any sounds? (Glass, beep, bell, or Hero)")?;
    Ok(())
}

fn perform(action: &Action, out: &mut dyn Write) -> Result<()> {
    match action {
        Action::Bell => {
            out.write_all(b"\x07")?;
            writeln!(out, "   Bell character sent")?;
        }
        Action::Run { program, args } => match Command::new(program).args(args).output() {
            Ok(output) => {
                let code = output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                writeln!(out, "   {program} exit code: {code}")?;
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    writeln!(out, "   Error: {}", stderr.trim())?;
                }
            }
            Err(e) => writeln!(out, "   could not run {program}: {e}")?,
        },
        Action::Query { program, args } => match Command::new(program).args(args).output() {
            Ok(output) => {
                writeln!(out, "   {}", String::from_utf8_lossy(&output.stdout).trim())?;
            }
            Err(e) => writeln!(out, "   could not run {program}: {e}")?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_plan_never_touches_volume() {
        let steps = plan(false);
        assert_eq!(steps.len(), 4);
        let touches_volume = steps.iter().flat_map(|s| &s.actions).any(|a| {
            matches!(a, Action::Run { args, .. } if args.iter().any(|x| x.contains("set volume")))
        });
        assert!(!touches_volume);
    }

    #[test]
    fn loud_plan_ends_with_hero() {
        let steps = plan(true);
        assert_eq!(steps.len(), 5);
        let last = steps.last().unwrap();
        assert_eq!(
            last.actions[1],
            Action::Run {
                program: "afplay",
                args: vec!["/System/Library/Sounds/Hero.aiff".to_string()],
            }
        );
    }

    #[test]
    fn report_covers_every_step() {
        let mut out = Vec::new();
        run(false, Duration::ZERO, &mut out).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("1. Testing afplay directly:"));
        assert!(text.contains("3. Testing terminal bell:"));
        assert!(text.contains("Bell character sent"));
        assert!(text.contains("4. Checking volume settings:"));
        assert!(text.contains("--loud"));
        assert!(out.contains(&0x07));
    }
}
