//! Window management using GLFW
//!
//! Provides window creation, keyboard state and Vulkan surface creation

use std::collections::HashSet;

use thiserror::Error;

pub use glfw::Key;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    keys_down: HashSet<Key>,
    resized: bool,
}

impl Window {
    /// Open a resizable window without a client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Window created: {}x{} '{}'", width, height, title);
        Ok(Self {
            glfw,
            window,
            events,
            keys_down: HashSet::new(),
            resized: false,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Pump the event queue, updating key state; Escape closes the window
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::Key(Key::Escape, _, glfw::Action::Press, _) => {
                    self.window.set_should_close(true);
                }
                glfw::WindowEvent::Key(key, _, glfw::Action::Press, _) => {
                    self.keys_down.insert(key);
                }
                glfw::WindowEvent::Key(key, _, glfw::Action::Release, _) => {
                    self.keys_down.remove(&key);
                }
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {}x{}", width, height);
                    self.resized = true;
                }
                _ => {}
            }
        }
    }

    /// Whether a key is held
    pub fn is_key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }

    /// Whether the framebuffer changed size since the last call
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Framebuffer extent in pixels
    #[allow(clippy::cast_sign_loss)]
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Milliseconds since GLFW was initialized
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn time_ms(&self) -> u64 {
        (self.glfw.get_time() * 1000.0) as u64
    }

    /// Block until an event arrives; used while minimized
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&mut self, instance: ash::vk::Instance) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {:?}", result)))
        }
    }
}
