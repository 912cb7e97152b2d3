//! Protocol-level mount simulator.
//!
//! A TCP listener that speaks the 10micron command dialect well enough to
//! exercise every link in this crate: concatenated commands in,
//! `#`-terminated reply fields out, with a small simulated mount behind
//! it (pointing state, slews on a timer, an alignment model that can be
//! read, programmed, and pruned).
//!
//! Every link opens its own connection, exactly as against real hardware,
//! so the integration tests drive the full socket path.

use crate::transform::{decimal_to_degree, deg_string_to_decimal};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// One simulated alignment point.
#[derive(Debug, Clone)]
struct SimAlignPoint {
    ha_hours: f64,
    dec_deg: f64,
    error_arcsec: f64,
    error_angle_deg: f64,
}

/// Simulated mount state shared across connections.
#[derive(Debug)]
pub struct SimState {
    /// Firmware string answered to `:GVN#`.
    pub firmware: String,
    /// Site, wire conventions (east longitude negative).
    pub site_longitude_wire: String,
    pub site_latitude: String,
    pub site_height: String,

    pub ra_hours: f64,
    pub dec_deg: f64,
    pub az: f64,
    pub alt: f64,
    pub pierside: char,
    pub status: u8,
    slew_until: Option<Instant>,
    /// How long a commanded slew takes.
    pub slew_duration: Duration,
    target_az: f64,
    target_alt: f64,

    pub lst: String,
    pub refraction_temperature: String,
    pub refraction_pressure: String,

    points: Vec<SimAlignPoint>,
    staged: Option<Vec<SimAlignPoint>>,
    pub model_names: Vec<String>,
    /// Refuse `:FLIP#` with `0`.
    pub refuse_flip: bool,
    /// Jitter solve/point errors for exercise variety (simulator binary).
    pub jitter: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            firmware: "2.15.1".to_string(),
            site_longitude_wire: "-011:42:17.3".to_string(),
            site_latitude: "+48:07:00".to_string(),
            site_height: "0580.0".to_string(),
            ra_hours: 12.0,
            dec_deg: 45.0,
            az: 180.0,
            alt: 45.0,
            pierside: 'W',
            status: 0,
            slew_until: None,
            slew_duration: Duration::from_millis(400),
            target_az: 180.0,
            target_alt: 45.0,
            lst: "13:00:00.00".to_string(),
            refraction_temperature: "+010.0".to_string(),
            refraction_pressure: "1013.0".to_string(),
            points: Vec::new(),
            staged: None,
            model_names: Vec::new(),
            refuse_flip: false,
            jitter: false,
        }
    }
}

impl SimState {
    fn fw_value(&self) -> u32 {
        crate::protocol::Firmware::parse(&self.firmware).value()
    }

    /// Seed the model with `(error, angle)` pairs at generic positions.
    pub fn seed_model(&mut self, errors: &[(f64, f64)]) {
        self.points = errors
            .iter()
            .enumerate()
            .map(|(i, (error, angle))| SimAlignPoint {
                ha_hours: 1.0 + i as f64 * 0.5,
                dec_deg: 20.0 + i as f64 * 5.0,
                error_arcsec: *error,
                error_angle_deg: *angle,
            })
            .collect();
    }

    pub fn star_count(&self) -> usize {
        self.points.len()
    }

    pub fn rms(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.points.iter().map(|p| p.error_arcsec.powi(2)).sum();
        (sum / self.points.len() as f64).sqrt()
    }

    fn settle_slew(&mut self) {
        if let Some(until) = self.slew_until {
            if Instant::now() >= until {
                self.slew_until = None;
                self.status = 0;
                self.az = self.target_az;
                self.alt = self.target_alt;
                self.pierside = if self.target_az >= 180.0 { 'W' } else { 'E' };
            }
        }
    }

    fn is_slewing(&self) -> bool {
        self.slew_until.is_some()
    }

    fn ginfo(&mut self) -> String {
        self.settle_slew();
        format!(
            "{:09.6},{:+010.6},{},{:08.4},{:07.4},2460000.123450,{},{}",
            self.ra_hours,
            self.dec_deg,
            self.pierside,
            self.az,
            self.alt,
            self.status,
            u8::from(self.is_slewing()),
        )
    }
}

/// The simulator server.
pub struct MountSimulator {
    listener: TcpListener,
    state: Arc<Mutex<SimState>>,
}

impl MountSimulator {
    /// Bind to an address (use port 0 for an ephemeral test port).
    pub async fn bind(addr: &str, state: SimState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle onto the simulated state, for test assertions and
    /// scenario setup.
    pub fn state(&self) -> Arc<Mutex<SimState>> {
        self.state.clone()
    }

    /// Accept loop. Each link gets its own connection task.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((socket, peer)) => {
                    trace!(%peer, "Simulator connection accepted");
                    let state = self.state.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, state, cancel).await {
                            debug!(error = %e, "Simulator connection ended");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Simulator accept failed");
                    break;
                }
            }
        }
    }

    /// Convenience for tests: bind on an ephemeral port, run in the
    /// background, return the address, the state handle, and the token
    /// that stops the server.
    pub async fn spawn(
        state: SimState,
    ) -> std::io::Result<(SocketAddr, Arc<Mutex<SimState>>, CancellationToken)> {
        let sim = Self::bind("127.0.0.1:0", state).await?;
        let addr = sim.local_addr()?;
        let handle = sim.state();
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        tokio::spawn(async move { sim.run(run_cancel).await });
        Ok((addr, handle, cancel))
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    state: Arc<Mutex<SimState>>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            n = socket.read(&mut chunk) => n?,
        };
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);

        // Commands arrive as ":cmd#:cmd#…\r"; process complete batches
        while let Some(pos) = buffer.iter().position(|b| *b == b'\r') {
            let batch: Vec<u8> = buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&batch[..batch.len() - 1]).into_owned();
            let reply = process_batch(&text, &state);
            if !reply.is_empty() {
                socket.write_all(reply.as_bytes()).await?;
            }
        }
    }
}

/// Split a command batch on `#` and answer each command in order.
fn process_batch(batch: &str, state: &Arc<Mutex<SimState>>) -> String {
    let mut reply = String::new();
    for command in batch.split('#') {
        let command = command.trim();
        if command.is_empty() {
            continue;
        }
        reply.push_str(&process_command(command, state));
    }
    reply
}

#[allow(clippy::too_many_lines)]
fn process_command(command: &str, state: &Arc<Mutex<SimState>>) -> String {
    let mut s = match state.lock() {
        Ok(s) => s,
        Err(poisoned) => poisoned.into_inner(),
    };

    // Fixed-name commands first, then the parameterised families
    match command {
        ":U2" => return String::new(),
        ":GS" => return format!("{}#", s.lst),
        ":Ginfo" => return format!("{}#", s.ginfo()),
        ":GMs" => return "15.0#".to_string(),
        ":Gmte" => return "35#".to_string(),
        ":Glmt" => return "15#".to_string(),
        ":Glms" => return "05#".to_string(),
        ":GRTMP" => return format!("{}#", s.refraction_temperature),
        ":GRPRS" => return format!("{}#", s.refraction_pressure),
        ":GT" => return "60.2#".to_string(),
        ":GTMP1" => return "+010.5#".to_string(),
        ":GREF" => return "1#".to_string(),
        ":Guaf" => return "0#".to_string(),
        ":Gdat" => return "1#".to_string(),
        ":Gh" => return "80#".to_string(),
        ":Go" => return "00#".to_string(),
        ":modelcnt" => return format!("{:03}#", s.model_names.len()),
        ":getalst" => return format!("{:03}#", s.star_count()),
        ":GDUTV" => return "V,2027-01-01#".to_string(),
        ":Gev" => return format!("{}#", s.site_height),
        ":Gg" => return format!("{}#", s.site_longitude_wire),
        ":Gt" => return format!("{}#", s.site_latitude),
        ":GVD" => return "Mar 19 2024#".to_string(),
        ":GVN" => return format!("{}#", s.firmware),
        ":GVP" => return "10micron GM1000HPS#".to_string(),
        ":GVT" => return "21:00:00#".to_string(),
        ":GVZ" => return "1.6#".to_string(),
        ":getain" => {
            let rms = s.rms();
            return format!("0005.2,-0002.1,0012.5,045.0,0000.8,1.5,-0.5,{},{:06.1}#",
                s.star_count().max(11), rms);
        }
        ":newalig" => {
            s.staged = Some(Vec::new());
            return "V#".to_string();
        }
        ":endalig" => {
            return match s.staged.take() {
                Some(points) if !points.is_empty() => {
                    s.points = points;
                    "V#".to_string()
                }
                _ => "E#".to_string(),
            };
        }
        ":delalig" => {
            s.points.clear();
            return String::new();
        }
        ":shutdown" => return "1#".to_string(),
        ":FLIP" => {
            return if s.refuse_flip {
                "0#".to_string()
            } else {
                "1#".to_string()
            };
        }
        ":MS" => {
            s.status = 6;
            s.slew_until = Some(Instant::now() + s.slew_duration);
            return "0#".to_string();
        }
        ":CMCFG0" => return "V#".to_string(),
        ":CM" => return "Coordinates matched#".to_string(),
        ":PO" | ":hP" => return String::new(),
        _ => {}
    }

    if let Some(rest) = command.strip_prefix(":getalp") {
        let index: usize = rest.parse().unwrap_or(0);
        return match index.checked_sub(1).and_then(|i| s.points.get(i)) {
            Some(point) => format!(
                "{},{},{:06.1},{:+06.1}#",
                decimal_to_degree(point.ha_hours, false, true, ':'),
                decimal_to_degree(point.dec_deg, true, false, ':').replacen(':', "*", 1),
                point.error_arcsec,
                point.error_angle_deg,
            ),
            None => "E#".to_string(),
        };
    }

    if let Some(rest) = command.strip_prefix(":delalst") {
        let index: usize = rest.parse().unwrap_or(0);
        return match index.checked_sub(1) {
            Some(i) if i < s.points.len() => {
                s.points.remove(i);
                "1#".to_string()
            }
            _ => "0#".to_string(),
        };
    }

    if let Some(rest) = command.strip_prefix(":newalpt") {
        let point = parse_newalpt(rest, &s);
        return match (point, s.staged.as_mut()) {
            (Some(point), Some(staged)) => {
                staged.push(point);
                "V#".to_string()
            }
            _ => "E#".to_string(),
        };
    }

    if let Some(rest) = command.strip_prefix(":modelnam") {
        let index: usize = rest.parse().unwrap_or(0);
        let name = index
            .checked_sub(1)
            .and_then(|i| s.model_names.get(i))
            .cloned()
            .unwrap_or_default();
        return format!("{}#", name);
    }

    if let Some(name) = command.strip_prefix(":modelld0") {
        return if s.model_names.iter().any(|n| n == name) {
            "1#".to_string()
        } else {
            "0#".to_string()
        };
    }
    if let Some(name) = command.strip_prefix(":modelsv0") {
        let name = name.to_string();
        if !s.model_names.contains(&name) {
            s.model_names.push(name);
        }
        return "1#".to_string();
    }
    if let Some(name) = command.strip_prefix(":modeldel0") {
        let before = s.model_names.len();
        s.model_names.retain(|n| n != name);
        return if s.model_names.len() < before {
            "1#".to_string()
        } else {
            "0#".to_string()
        };
    }

    if let Some(rest) = command.strip_prefix(":Sz") {
        s.target_az = deg_string_to_decimal(&rest.replace('*', ":"), ':');
        return "1#".to_string();
    }
    if let Some(rest) = command.strip_prefix(":Sa") {
        s.target_alt = deg_string_to_decimal(&rest.replace('*', ":"), ':');
        return "1#".to_string();
    }
    if command.starts_with(":Sr") || command.starts_with(":Sd") {
        return "1#".to_string();
    }
    if command.starts_with(":SRPRS") {
        s.refraction_pressure = command.trim_start_matches(":SRPRS").to_string();
        return String::new();
    }
    if command.starts_with(":SRTMP") {
        s.refraction_temperature = command.trim_start_matches(":SRTMP").to_string();
        return String::new();
    }

    warn!(command, "Simulator: unknown command ignored");
    String::new()
}

/// Parse a `:newalpt` payload into a staged point, deriving the error
/// vector the way the mount would.
fn parse_newalpt(payload: &str, s: &SimState) -> Option<SimAlignPoint> {
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() != 6 {
        return None;
    }
    let ra = deg_string_to_decimal(parts[0], ':');
    let dec = deg_string_to_decimal(parts[1], ':');
    if !matches!(parts[2], "E" | "W") {
        return None;
    }
    let ra_solved = deg_string_to_decimal(parts[3], ':');
    let dec_solved = deg_string_to_decimal(parts[4], ':');
    let lst = deg_string_to_decimal(parts[5], ':');

    let mut ra_error = (ra_solved - ra) * 3600.0;
    let mut dec_error = (dec_solved - dec) * 3600.0;
    if s.jitter {
        let mut rng = rand::thread_rng();
        ra_error += rng.gen_range(-0.5..0.5);
        dec_error += rng.gen_range(-0.5..0.5);
    }

    Some(SimAlignPoint {
        ha_hours: (lst - ra).rem_euclid(24.0),
        dec_deg: dec,
        error_arcsec: (ra_error * ra_error + dec_error * dec_error).sqrt(),
        error_angle_deg: ra_error.atan2(dec_error).to_degrees(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(state: &Arc<Mutex<SimState>>, batch: &str) -> String {
        process_batch(batch, state)
    }

    fn shared(state: SimState) -> Arc<Mutex<SimState>> {
        Arc::new(Mutex::new(state))
    }

    #[test]
    fn test_fast_template_reply() {
        let state = shared(SimState::default());
        let reply = answer(&state, ":U2#:GS#:Ginfo#");
        assert_eq!(reply.matches('#').count(), 2);
        assert!(reply.starts_with("13:00:00.00#"));
        // The combined reply is never shorter than the framing minimum
        assert!(reply.len() >= crate::config::defaults::GINFO_MIN_LEN);
    }

    #[test]
    fn test_model_read_replies() {
        let mut sim = SimState::default();
        sim.seed_model(&[(4.0, 10.0), (2.1, 20.0), (9.3, 30.0)]);
        let state = shared(sim);

        assert_eq!(answer(&state, ":getalst#"), "003#");
        let p1 = answer(&state, ":getalp1#");
        assert_eq!(p1.split(',').count(), 4);
        assert!(p1.contains('*'));
        assert_eq!(answer(&state, ":getalp9#"), "E#");
    }

    #[test]
    fn test_upload_session() {
        let state = shared(SimState::default());
        let batch = ":newalig#\
            :newalpt12:30:00.0,+45:00:00,W,12:30:01.0,+45:00:30,13:00:00.0#\
            :endalig#:getalst#";
        let reply = answer(&state, batch);
        assert_eq!(reply, "V#V#V#001#");
        let s = state.lock().unwrap();
        assert_eq!(s.star_count(), 1);
        assert!(s.rms() > 0.0);
    }

    #[test]
    fn test_delete_point() {
        let mut sim = SimState::default();
        sim.seed_model(&[(4.0, 0.0), (9.3, 0.0), (1.2, 0.0), (3.0, 0.0)]);
        let state = shared(sim);
        assert_eq!(answer(&state, ":delalst2#"), "1#");
        assert_eq!(state.lock().unwrap().star_count(), 3);
        assert_eq!(answer(&state, ":delalst9#"), "0#");
    }

    #[test]
    fn test_slew_sets_target_and_finishes() {
        let mut sim = SimState::default();
        sim.slew_duration = Duration::from_millis(0);
        let state = shared(sim);
        let reply = answer(&state, ":Sz120*30#:Sa+55*00#:MS#");
        assert_eq!(reply, "1#1#0#");
        // Zero-duration slew: the next Ginfo reports arrival
        let ginfo = answer(&state, ":Ginfo#");
        assert!(ginfo.contains(",120.5000,"));
        assert!(ginfo.ends_with(",0,0#"));
    }
}
