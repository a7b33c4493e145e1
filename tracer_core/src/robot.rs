//! The robot context serviced by the scheduler, and its builder.
//!
//! `Robot` owns the sensor bank, the motor controller and the velocity
//! profile. Slot handlers receive it as `&mut Robot`; a handler that hits a
//! hardware error latches it in `fault` for the foreground to pick up.

use crate::config::{DriveCfg, IrCalibration, MotorCfg, SensingCfg};
use crate::error::{BuildError, Result, TracerError};
use crate::motor::{MotorController, TargetUpdater};
use crate::scheduler::Scheduler;
use crate::sensing::{IrState, SensorBank};
use crate::velocity::VelocityProfile;
use tracer_traits::{AnalogFrontEnd, HBridge, QuadratureEncoder, Wheel};

pub type DynAnalog = Box<dyn AnalogFrontEnd + Send>;
pub type DynEncoder = Box<dyn QuadratureEncoder + Send>;
pub type DynBridge = Box<dyn HBridge + Send>;

pub const SENSING_SLOT: usize = 0;
pub const MOTOR_SLOT: usize = 1;
pub const DRIVE_SLOT: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Intervals {
    sensing_us: u32,
    motor_us: u32,
    drive_us: u32,
}

pub struct Robot {
    pub sensing: SensorBank<DynAnalog>,
    pub motors: MotorController<DynEncoder, DynBridge>,
    pub profile: VelocityProfile,
    ticks_per_meter: f32,
    intervals: Intervals,
    fault: Option<TracerError>,
}

impl core::fmt::Debug for Robot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Robot")
            .field("sweeps", &self.sensing.sweeps())
            .field("position", &self.sensing.position())
            .field("command", &self.profile.command())
            .field("motors_running", &self.motors.is_running())
            .field("fault", &self.fault)
            .finish()
    }
}

impl Robot {
    pub fn builder() -> RobotBuilder {
        RobotBuilder::default()
    }

    pub fn ticks_per_meter(&self) -> f32 {
        self.ticks_per_meter
    }

    /// Start the sensing slot.
    pub fn sensing_start(&self, sched: &mut Scheduler<Self>) -> Result<()> {
        sched.start(SENSING_SLOT, self.intervals.sensing_us, Self::on_sensing_tick)
    }

    pub fn sensing_stop(&self, sched: &mut Scheduler<Self>) -> Result<()> {
        sched.stop(SENSING_SLOT)
    }

    /// Run the position loop with a caller-supplied target updater.
    pub fn motor_control_start(
        &mut self,
        sched: &mut Scheduler<Self>,
        updater: Box<dyn TargetUpdater>,
    ) -> Result<()> {
        self.motors.start(updater)?;
        sched.start(MOTOR_SLOT, self.intervals.motor_us, Self::on_motor_tick)
    }

    /// Run the position loop from the velocity profile, and the drive slot
    /// that shapes it.
    pub fn velocity_control_start(&mut self, sched: &mut Scheduler<Self>) -> Result<()> {
        self.profile.reset();
        let integrator = self
            .profile
            .integrator(self.ticks_per_meter, self.intervals.motor_us);
        self.motor_control_start(sched, Box::new(integrator))?;
        sched.start(DRIVE_SLOT, self.intervals.drive_us, Self::on_drive_tick)
    }

    /// Stop both control slots and zero the outputs.
    pub fn motor_control_stop(&mut self, sched: &mut Scheduler<Self>) -> Result<()> {
        sched.stop(DRIVE_SLOT)?;
        sched.stop(MOTOR_SLOT)?;
        self.profile.reset();
        self.motors.stop()?;
        tracing::debug!("motor control stopped");
        Ok(())
    }

    fn on_sensing_tick(&mut self) {
        if let Err(e) = self.sensing.tick() {
            self.latch(e);
        }
    }

    fn on_motor_tick(&mut self) {
        let supply = self.sensing.supply_voltage();
        if let Err(e) = self.motors.control_tick(supply) {
            self.latch(e);
        }
    }

    fn on_drive_tick(&mut self) {
        self.profile
            .tick(self.sensing.position(), self.sensing.position_limited());
    }

    fn latch(&mut self, e: TracerError) {
        if self.fault.is_none() {
            tracing::warn!(error = %e, "fault latched in timer slot");
            self.fault = Some(e);
        }
    }

    /// First fault raised by a slot handler since the last call.
    pub fn take_fault(&mut self) -> Option<TracerError> {
        self.fault.take()
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Sign-compensated encoder positions `[left, right]`.
    pub fn odometry(&mut self) -> std::result::Result<[i32; 2], TracerError> {
        Ok([
            self.motors.encoder_value(Wheel::Left)?,
            self.motors.encoder_value(Wheel::Right)?,
        ])
    }
}

/// Snapshot published by a background scheduler thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub sweeps: u64,
    pub position: i32,
    pub state: IrState,
    pub command: f32,
}

/// Probe for `SchedulerThread::spawn`.
pub fn telemetry(robot: &Robot) -> Option<Telemetry> {
    Some(Telemetry {
        sweeps: robot.sensing.sweeps(),
        position: robot.sensing.position(),
        state: robot.sensing.state(),
        command: robot.profile.command(),
    })
}

/// Builder for `Robot`. Hardware must be supplied; configs default.
#[derive(Default)]
pub struct RobotBuilder {
    analog: Option<DynAnalog>,
    encoders: Option<[DynEncoder; 2]>,
    bridges: Option<[DynBridge; 2]>,
    sensing: Option<SensingCfg>,
    calibration: Option<IrCalibration>,
    motor: Option<MotorCfg>,
    drive: Option<DriveCfg>,
}

impl RobotBuilder {
    pub fn with_analog(mut self, afe: impl AnalogFrontEnd + Send + 'static) -> Self {
        self.analog = Some(Box::new(afe));
        self
    }

    pub fn with_encoders(
        mut self,
        left: impl QuadratureEncoder + Send + 'static,
        right: impl QuadratureEncoder + Send + 'static,
    ) -> Self {
        let left: DynEncoder = Box::new(left);
        let right: DynEncoder = Box::new(right);
        self.encoders = Some([left, right]);
        self
    }

    pub fn with_bridges(
        mut self,
        left: impl HBridge + Send + 'static,
        right: impl HBridge + Send + 'static,
    ) -> Self {
        let left: DynBridge = Box::new(left);
        let right: DynBridge = Box::new(right);
        self.bridges = Some([left, right]);
        self
    }

    pub fn with_sensing(mut self, cfg: SensingCfg) -> Self {
        self.sensing = Some(cfg);
        self
    }

    pub fn with_calibration(mut self, cal: IrCalibration) -> Self {
        self.calibration = Some(cal);
        self
    }

    pub fn with_motor(mut self, cfg: MotorCfg) -> Self {
        self.motor = Some(cfg);
        self
    }

    pub fn with_drive(mut self, cfg: DriveCfg) -> Self {
        self.drive = Some(cfg);
        self
    }

    pub fn try_build(self) -> Result<Robot> {
        let analog = self
            .analog
            .ok_or_else(|| eyre::Report::new(BuildError::MissingAnalog))?;
        let encoders = self
            .encoders
            .ok_or_else(|| eyre::Report::new(BuildError::MissingEncoders))?;
        let bridges = self
            .bridges
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBridges))?;
        let sensing = self.sensing.unwrap_or_default();
        let motor = self.motor.unwrap_or_default();
        let drive = self.drive.unwrap_or_default();

        if sensing.tick_interval_us == 0 || motor.interval_us == 0 || drive.interval_us == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "slot intervals must be > 0",
            )));
        }
        if !(1..=7).contains(&sensing.window_half_width) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "window_half_width must be in [1, 7]",
            )));
        }
        if motor.dead_zone >= motor.pwm_top {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "dead_zone must be < pwm_top",
            )));
        }
        if motor.encoder_comp.iter().any(|c| c.abs() != 1) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "encoder_comp entries must be 1 or -1",
            )));
        }
        let tpm = motor.ticks_per_meter();
        if !(tpm.is_finite() && tpm > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "encoder geometry must give a positive ticks per meter",
            )));
        }

        let intervals = Intervals {
            sensing_us: sensing.tick_interval_us,
            motor_us: motor.interval_us,
            drive_us: drive.interval_us,
        };
        let bank = SensorBank::new(analog, sensing, self.calibration.unwrap_or_default())?;
        Ok(Robot {
            sensing: bank,
            motors: MotorController::new(encoders, bridges, motor),
            profile: VelocityProfile::new(&drive),
            ticks_per_meter: tpm,
            intervals,
            fault: None,
        })
    }
}
