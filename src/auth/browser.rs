// Browser hand-off for consent and login pages

use std::io;

/// Opens URLs for the user to complete an interactive step
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str);
}

type Launch = fn(&str) -> io::Result<()>;

/// Launches the system default browser, falling back to printing the URL.
///
/// `open::that` waits for the platform launcher to exit, so inside a tokio
/// runtime the launch runs on the blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct SystemBrowser {
    launch: Launch,
}

impl Default for SystemBrowser {
    fn default() -> Self {
        Self {
            launch: |url| open::that(url),
        }
    }
}

#[cfg(test)]
impl SystemBrowser {
    fn with_launcher(launch: Launch) -> Self {
        Self { launch }
    }
}

fn launch_or_print(launch: Launch, url: &str) {
    if let Err(e) = launch(url) {
        tracing::warn!("Could not open browser: {}", e);
        println!("Could not open browser. Please visit:\n{}", url);
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) {
        tracing::info!("Opening browser: {}", url);
        let launch = self.launch;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let url = url.to_string();
                handle.spawn_blocking(move || launch_or_print(launch, &url));
            }
            Err(_) => launch_or_print(launch, url),
        }
    }
}

/// Prints the URL without launching anything, for headless hosts
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &str) {
        println!("Open this URL in a browser:\n{}", url);
    }
}

/// Records opened URLs instead of launching a browser
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingBrowser {
    opened: std::sync::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<String> {
        match self.opened.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl BrowserLauncher for RecordingBrowser {
    fn open(&self, url: &str) {
        match self.opened.lock() {
            Ok(mut guard) => guard.push(url.to_string()),
            Err(poisoned) => poisoned.into_inner().push(url.to_string()),
        }
    }
}
