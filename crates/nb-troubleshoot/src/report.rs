use crate::backup::BackupSet;
use crate::remediate::{ActionOutcome, ActionStatus};
use crate::verify::Verification;
use ipnet::Ipv4Net;
use nb_core::IssueSet;

/// Everything a run found and did, rendered as the final summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub backup: Option<BackupSet>,
    pub subnet: Ipv4Net,
    pub egress: String,
    pub issues: IssueSet,
    pub actions: Vec<ActionOutcome>,
    pub verification: Option<Verification>,
}

impl RunReport {
    /// No issues were found, or the post-remediation checks passed.
    pub fn healthy(&self) -> bool {
        match &self.verification {
            Some(verification) => verification.passed(),
            None => self.issues.is_empty(),
        }
    }

    pub fn failed_actions(&self) -> usize {
        self.actions.iter().filter(|a| a.status.is_failure()).count()
    }

    pub fn display(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                  NAT Bridge Doctor Report                    ║");
        println!("╚══════════════════════════════════════════════════════════════╝");

        if let Some(backup) = &self.backup {
            println!("\n  💾 Backup: {}", backup.dir.display());
        }
        println!("  🌐 NAT subnet {} via {}", self.subnet, self.egress);

        println!("\n━━━ Issues ({}) ━━━", self.issues.len());
        if self.issues.is_empty() {
            println!("  ✅ No issues detected");
        }
        for issue in self.issues.iter() {
            println!("  ⚠️  {:<28} {}", issue.as_str(), issue.description());
        }

        if !self.actions.is_empty() {
            println!("\n━━━ Actions ━━━");
            for outcome in &self.actions {
                let symbol = match outcome.status {
                    ActionStatus::Applied => "🔧",
                    ActionStatus::AlreadySatisfied => "✔️ ",
                    ActionStatus::Deferred => "⏳",
                    ActionStatus::Failed(_) => "❌",
                };
                println!("  {} {} ({})", symbol, outcome.action, outcome.status);
            }
        }

        if let Some(verification) = &self.verification {
            println!("\n━━━ Verification ━━━");
            println!("  Restart: {}", verification.restart_path);
            for name in &verification.raised {
                println!("  Brought {} up", name);
            }
            println!(
                "  Bridges up: {}",
                if verification.bridges_up { "yes" } else { "no" }
            );
            println!(
                "  Internet:   {}",
                if verification.internet { "reachable" } else { "unreachable" }
            );
        }

        println!("\n━━━ Summary ━━━");
        let failed = self.failed_actions();
        if failed > 0 {
            println!("  ❌ {} action(s) failed", failed);
        }
        if self.healthy() {
            println!("  ✅ NAT bridge is healthy");
        } else {
            println!("  ⚠️  NAT bridge still needs attention");
        }
    }
}
