//! Pink Pearl
//!
//! Walk the player around an area; leaving a room through an edge scrolls
//! the camera to the neighbouring room.

mod player;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use pearl_engine::foundation::logging;
use pearl_engine::prelude::*;

use player::{exit_direction, MoveInput, Player};

const CONFIG_PATH: &str = "pink_pearl.toml";

/// Frames between FPS reports
const FPS_REPORT_INTERVAL: u64 = 600;

/// Consecutive failed frames tolerated before giving up
const MAX_FAILED_FRAMES: u32 = 120;

type AppResult<T> = Result<T, Box<dyn Error>>;

/// Window, renderer and the loaded area
pub struct PinkPearlApp {
    config: PearlConfig,
    area: Area,
    player: Option<Player>,
    clock: FixedTimestep,
    frame_timer: Timer,
    last_frame: Instant,
    failed_frames: u32,
    // Dropped before the window it renders into
    renderer: RenderManager,
    window: Window,
}

impl PinkPearlApp {
    /// Create the window and renderer and load every asset
    pub fn new(config: PearlConfig) -> AppResult<Self> {
        let load_time = Stopwatch::start_new();
        log::info!("Creating window...");
        let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;

        log::info!("Creating Vulkan renderer...");
        let mut renderer = RenderManager::new(&mut window, &config)?;

        let asset_dir = PathBuf::from(&config.game.asset_dir);
        let textures = renderer.load_texture_pack(&asset_dir.join(&config.game.texture_pack))?;
        log::info!("Loaded {} textures", textures);

        let area_data = read_area_data(&read_asset(&asset_dir, &config.game.area_file)?)?;
        let mut area = Area::from_data(area_data, config.area.cache_slots, config.area.transition_ms);
        renderer.load_area(&mut area, config.game.start_room)?;
        log::info!("Area loaded with {} rooms, starting in room {}", area.rooms().len(), config.game.start_room);

        let records = read_entity_records(&read_asset(&asset_dir, &config.game.entity_file)?)?;
        let record = records.first().ok_or("entity file has no records")?;
        let start = area
            .current_room()
            .map(|room| {
                let bounds = room.world_bounds();
                Vec2::new(bounds.x + bounds.w / 2.0, bounds.y + bounds.h / 2.0)
            })
            .ok_or("start room is missing")?;
        let player = Player::spawn(&mut renderer, record, start, window.time_ms())?;

        log::info!("Startup took {} ms", load_time.elapsed_ms());
        let clock = FixedTimestep::new(config.game.tick_rate_hz);
        Ok(Self {
            config,
            area,
            player: Some(player),
            clock,
            frame_timer: Timer::new(),
            last_frame: Instant::now(),
            failed_frames: 0,
            renderer,
            window,
        })
    }

    /// Run until the window closes
    pub fn run(&mut self) -> AppResult<()> {
        log::info!("Starting main loop at {} ticks per second", self.config.game.tick_rate_hz);
        let extent = self.area.room_size().world_extent();
        let bounds = ProjectionBounds::from_extent(extent.x, extent.y);

        while !self.window.should_close() {
            self.window.poll_events();
            if self.window.take_resized() {
                self.renderer.handle_resize();
            }
            let (width, height) = self.window.framebuffer_size();
            if width == 0 || height == 0 {
                // Minimized: block instead of spinning
                self.window.wait_events();
                self.last_frame = Instant::now();
                continue;
            }

            let now = Instant::now();
            let ticks = self.clock.advance(now - self.last_frame);
            self.last_frame = now;
            for _ in 0..ticks {
                self.tick()?;
            }

            let now_ms = self.window.time_ms();
            let camera = RenderManager::camera_position(&mut self.area, now_ms);
            let delta = self.clock.interpolation_delta();
            match self.renderer.render_frame(&self.window, now_ms, delta, camera, bounds, true) {
                Ok(status) => {
                    if status == FrameStatus::Skipped {
                        log::trace!("Frame skipped");
                    }
                    self.failed_frames = 0;
                }
                Err(e) => {
                    self.failed_frames += 1;
                    if frame_error_is_fatal(&e, self.failed_frames) {
                        return Err(e.into());
                    }
                    log::warn!("Frame dropped: {}", e);
                }
            }

            self.frame_timer.update();
            if self.frame_timer.frame_count() % FPS_REPORT_INTERVAL == 0 {
                log::debug!("{:.1} fps average", self.frame_timer.average_fps());
            }
        }

        log::info!("Window closed after {} ticks", self.clock.tick_count());
        Ok(())
    }

    /// One simulation step
    fn tick(&mut self) -> AppResult<()> {
        let now_ms = self.window.time_ms();
        let Some(player) = self.player.as_mut() else {
            return Ok(());
        };
        player.update(&mut self.renderer, MoveInput::from_window(&self.window), now_ms)?;

        if self.area.is_scrolling() {
            return Ok(());
        }
        let Some(room) = self.area.current_room().map(Room::world_bounds) else {
            return Ok(());
        };
        let direction = exit_direction(&room, player.center());
        if direction == Direction::None {
            return Ok(());
        }

        match self.renderer.transition_room(&mut self.area, direction, now_ms) {
            Ok(TransitionOutcome::Blocked) => player.confine(&mut self.renderer, &room)?,
            Ok(outcome) => log::debug!("Leaving room {:?}: {:?}", direction, outcome),
            Err(e) if !e.is_fatal() => {
                log::warn!("Could not enter the room {:?}: {}", direction, e);
                player.confine(&mut self.renderer, &room)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Release the player and the area's render objects
    pub fn shutdown(&mut self) -> AppResult<()> {
        if let Some(player) = self.player.take() {
            player.despawn(&mut self.renderer)?;
        }
        self.renderer.unload_area(&mut self.area);
        log::info!("Shut down cleanly");
        Ok(())
    }
}

/// Device failures end the game at once; anything else after a long run of failed frames
fn frame_error_is_fatal(error: &RenderError, consecutive_failures: u32) -> bool {
    error.is_fatal() || consecutive_failures >= MAX_FAILED_FRAMES
}

fn read_asset(asset_dir: &Path, name: &str) -> AppResult<Vec<u8>> {
    let path = asset_dir.join(name);
    fs::read(&path).map_err(|e| format!("failed to read {}: {}", path.display(), e).into())
}

fn start() -> AppResult<()> {
    let config = PearlConfig::load_or_default(CONFIG_PATH).map_err(|e| {
        logging::init_with_level("info");
        e
    })?;
    logging::init_with_level(&config.log_level);
    config.validate()?;

    let mut app = PinkPearlApp::new(config)?;
    let result = app.run();
    app.shutdown()?;
    result
}

fn main() {
    if let Err(e) = start() {
        log::error!("Pink Pearl failed: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearl_engine::render::backends::vulkan::VulkanError;

    #[test]
    fn test_recoverable_frame_errors_keep_running() {
        let missing = RenderError::TextureNotFound("player".to_string());
        assert!(!frame_error_is_fatal(&missing, 1));
        assert!(!frame_error_is_fatal(&RenderError::StitchFailed("slot 0".to_string()), 1));
        assert!(frame_error_is_fatal(&missing, MAX_FAILED_FRAMES));
    }

    #[test]
    fn test_device_failure_ends_the_game() {
        let lost = RenderError::Vulkan(VulkanError::Timeout { what: "frame in flight", timeout_ms: 5000 });
        assert!(frame_error_is_fatal(&lost, 1));
    }

    #[test]
    fn test_stitch_failure_does_not_end_the_game() {
        assert!(!AreaError::Render(RenderError::StitchFailed("room 4 into slot 1".to_string())).is_fatal());
    }
}
